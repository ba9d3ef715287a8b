use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Offset};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, ClientError, LoginForm, SignupForm, SortDirection, StudentColumn,
    StudentDirectory, SyncOutcome, TutorClient, VisibleRange,
};
use shared::protocol::{FieldValue, NewStudent, StudentRecord};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tutor", about = "Command-line front end for the tutor CRM service")]
struct Cli {
    /// Overrides the configured service URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    Signup {
        name: String,
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    Logout,
    Status,
    /// Lessons in a date window; defaults to the current week.
    Lessons {
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
        /// Any day of the week to show (YYYY-MM-DD).
        #[arg(long, conflicts_with_all = ["start", "end"])]
        week: Option<NaiveDate>,
    },
    Students {
        #[arg(long, default_value = "full_name")]
        sort: StudentColumn,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        json: bool,
    },
    AddStudent {
        full_name: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long, default_value_t = 0.0)]
        price: f64,
        #[arg(long)]
        comment: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let unauthorized = err
            .downcast_ref::<ClientError>()
            .is_some_and(ClientError::is_unauthorized);
        if unauthorized {
            eprintln!("session expired; log in again");
            std::process::exit(2);
        }
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = load_settings();
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }
    debug!(api_url = %settings.api_url, session_dir = %settings.session_dir.display(), "cli: settings loaded");
    let client = TutorClient::new(&settings).context("failed to initialise client")?;

    match cli.command {
        Command::Login { email, password } => {
            let identity = client.login(&LoginForm { email, password }).await?;
            println!("logged in as {} <{}>", identity.display_name(), identity.email);
        }
        Command::Signup {
            name,
            email,
            password,
            confirm_password,
        } => {
            let identity = client
                .signup(&SignupForm {
                    name,
                    email,
                    password,
                    confirm_password,
                })
                .await?;
            println!("account created for {} <{}>", identity.display_name(), identity.email);
        }
        Command::Logout => {
            client.logout();
            println!("logged out");
        }
        Command::Status => {
            let session = client.session().snapshot();
            match session.identity {
                Some(identity) if session.is_authenticated() => {
                    println!("{}: {} <{}>", session.status, identity.display_name(), identity.email)
                }
                _ => println!("{}", session.status),
            }
        }
        Command::Lessons { start, end, week } => {
            let range = match (start, end) {
                (Some(start), Some(end)) => VisibleRange::parse(&start, &end)?,
                _ => {
                    let now = Local::now();
                    let day = week.unwrap_or_else(|| now.date_naive());
                    VisibleRange::week_containing(day, now.offset().fix())?
                }
            };
            match client.calendar().on_range_changed(range.clone()).await {
                SyncOutcome::Applied { .. } => {}
                SyncOutcome::Superseded => {}
                SyncOutcome::Failed { message } => {
                    // surface 401s through the usual exit path
                    if !client.session().is_authenticated() {
                        return Err(ClientError::Unauthorized { detail: Some(message) }.into());
                    }
                    anyhow::bail!("failed to load lessons: {message}");
                }
            }
            println!("lessons {} .. {}", range.start_str(), range.end_str());
            for event in client.calendar().events().await {
                println!(
                    "{} - {}  {}  [{}]",
                    event.start,
                    event.end,
                    event.title,
                    event.background_color()
                );
            }
        }
        Command::Students { sort, desc, json } => {
            let directory = client.students();
            directory.refresh().await?;
            apply_sort(directory, sort, desc).await;
            let students = directory.sorted().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&students)?);
            } else {
                print_students(directory, &students).await;
            }
        }
        Command::AddStudent {
            full_name,
            parent,
            contact,
            price,
            comment,
        } => {
            let created = client
                .students()
                .create(NewStudent {
                    full_name,
                    parent_name: parent,
                    telegram_contact: contact,
                    default_price: price,
                    comment,
                })
                .await?;
            println!("created student {} ({})", created.full_name, created.id);
        }
    }

    Ok(())
}

/// Clicks the column header until the requested directive is active.
async fn apply_sort(directory: &StudentDirectory, column: StudentColumn, desc: bool) {
    let wanted = if desc {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    };
    let mut state = directory.sort_state().await;
    if state.directive().field != column.field() {
        state = directory.toggle_sort(column).await;
    }
    if state.directive().direction != wanted {
        directory.toggle_sort(column).await;
    }
}

async fn print_students(directory: &StudentDirectory, students: &[StudentRecord]) {
    let mut header = Vec::with_capacity(StudentColumn::ALL.len());
    for column in StudentColumn::ALL {
        let indicator = directory.indicator(column).await;
        let arrow = if indicator.visible {
            indicator.arrow
        } else {
            ' '
        };
        header.push(format!("{} {arrow}", column.label()));
    }
    println!("{}", header.join(" | "));

    for student in students {
        let grade = match &student.grade {
            Some(FieldValue::Number(number)) => number.to_string(),
            Some(FieldValue::Text(text)) => text.clone(),
            None => String::new(),
        };
        let balance = student
            .balance
            .map(|balance| format!("{balance:.2}"))
            .unwrap_or_default();
        println!(
            "{} | {} | {} | {:.2} | {}",
            student.full_name,
            grade,
            student.telegram_contact.as_deref().unwrap_or("-"),
            student.default_price,
            balance
        );
    }
}
