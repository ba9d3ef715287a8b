//! Student list view-model: cached `/students/` records, the active sort
//! and student creation.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use shared::protocol::{NewStudent, StudentRecord};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::{
    error::ClientError,
    sorter::{SortIndicator, SortState},
    ClientEvent,
};

#[async_trait]
pub trait StudentSource: Send + Sync {
    async fn list_students(&self) -> Result<Vec<StudentRecord>, ClientError>;
    async fn create_student(&self, student: &NewStudent) -> Result<StudentRecord, ClientError>;
}

/// Sortable columns of the student table, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StudentColumn {
    FullName,
    Grade,
    TelegramContact,
    DefaultPrice,
    Balance,
}

impl StudentColumn {
    pub const ALL: [StudentColumn; 5] = [
        StudentColumn::FullName,
        StudentColumn::Grade,
        StudentColumn::TelegramContact,
        StudentColumn::DefaultPrice,
        StudentColumn::Balance,
    ];

    pub fn field(self) -> &'static str {
        match self {
            StudentColumn::FullName => "full_name",
            StudentColumn::Grade => "grade",
            StudentColumn::TelegramContact => "telegram_contact",
            StudentColumn::DefaultPrice => "default_price",
            StudentColumn::Balance => "balance",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StudentColumn::FullName => "Ім'я",
            StudentColumn::Grade => "Клас",
            StudentColumn::TelegramContact => "Контакти",
            StudentColumn::DefaultPrice => "Тариф",
            StudentColumn::Balance => "Баланс",
        }
    }
}

impl fmt::Display for StudentColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

impl FromStr for StudentColumn {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase().replace('-', "_");
        let column = match value.as_str() {
            "full_name" | "name" => StudentColumn::FullName,
            "grade" => StudentColumn::Grade,
            "telegram_contact" | "contact" | "telegram" => StudentColumn::TelegramContact,
            "default_price" | "price" => StudentColumn::DefaultPrice,
            "balance" => StudentColumn::Balance,
            other => {
                return Err(ClientError::Validation(format!(
                    "unknown student column '{other}'"
                )))
            }
        };
        Ok(column)
    }
}

struct DirectoryState {
    students: Vec<StudentRecord>,
    sort: SortState,
}

pub struct StudentDirectory {
    source: Arc<dyn StudentSource>,
    state: RwLock<DirectoryState>,
    events: broadcast::Sender<ClientEvent>,
}

impl StudentDirectory {
    pub fn new(source: Arc<dyn StudentSource>, events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            source,
            state: RwLock::new(DirectoryState {
                students: Vec::new(),
                sort: SortState::new(StudentColumn::FullName.field()),
            }),
            events,
        }
    }

    /// Reloads the list. On failure the previous list stays cached.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        match self.source.list_students().await {
            Ok(students) => {
                let count = students.len();
                self.state.write().await.students = students;
                info!(count, "students: list refreshed");
                let _ = self.events.send(ClientEvent::StudentsUpdated { count });
                Ok(count)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "students: failed to load list; keeping previous");
                let _ = self
                    .events
                    .send(ClientEvent::StudentsLoadFailed { message });
                Err(err)
            }
        }
    }

    pub async fn create(&self, student: NewStudent) -> Result<StudentRecord, ClientError> {
        validate_new_student(&student)?;
        let created = self.source.create_student(&student).await?;
        info!(student_id = %created.id, "students: student created");
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "students: refresh after create failed");
        }
        Ok(created)
    }

    /// Cached records in the order the service returned them.
    pub async fn students(&self) -> Vec<StudentRecord> {
        self.state.read().await.students.clone()
    }

    pub async fn sorted(&self) -> Vec<StudentRecord> {
        let state = self.state.read().await;
        state.sort.apply(&state.students)
    }

    pub async fn toggle_sort(&self, column: StudentColumn) -> SortState {
        let mut state = self.state.write().await;
        state.sort.toggle(column.field());
        state.sort.clone()
    }

    pub async fn sort_state(&self) -> SortState {
        self.state.read().await.sort.clone()
    }

    pub async fn indicator(&self, column: StudentColumn) -> SortIndicator {
        self.state.read().await.sort.indicator(column.field())
    }
}

fn validate_new_student(student: &NewStudent) -> Result<(), ClientError> {
    if student.full_name.trim().is_empty() {
        return Err(ClientError::Validation("full name is required".into()));
    }
    if !student.default_price.is_finite() || student.default_price < 0.0 {
        return Err(ClientError::Validation(format!(
            "default price must be a non-negative number, got {}",
            student.default_price
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/students_tests.rs"]
mod tests;
