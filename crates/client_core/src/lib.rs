//! Client-side session and data synchronization for the tutor CRM service.
//!
//! [`TutorClient`] wires the pieces together: a [`SessionStore`] that owns
//! authentication state, a [`Gateway`] every remote call goes through, the
//! [`CalendarSync`] range synchronizer and the [`StudentDirectory`] list
//! view-model. Presentation layers observe changes through [`ClientEvent`].

use std::sync::Arc;

use shared::protocol::Identity;
use tokio::sync::broadcast;
use tracing::info;

pub mod calendar;
pub mod collation;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod sorter;
pub mod storage;
pub mod students;

pub use calendar::{
    CalendarEvent, CalendarSync, EventColor, ScheduleSource, SyncOutcome, VisibleRange,
};
pub use config::{load_settings, ClientSettings};
pub use error::ClientError;
pub use gateway::{Credential, Gateway};
pub use session::{
    AuthApi, CredentialToken, LoginForm, Session, SessionStatus, SessionStore, SignupForm,
};
pub use sorter::{
    sort_records, SortDirection, SortDirective, SortIndicator, SortState, SortValue,
    SortableRecord,
};
pub use storage::{FileSessionStorage, MemorySessionStorage, PersistedSession, SessionStorage};
pub use students::{StudentColumn, StudentDirectory, StudentSource};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionChanged(SessionStatus),
    /// The service rejected the credential; the view should return to login.
    SessionInvalidated {
        reason: String,
    },
    CalendarUpdated {
        events: usize,
    },
    CalendarSyncFailed {
        start: String,
        end: String,
        message: String,
    },
    StudentsUpdated {
        count: usize,
    },
    StudentsLoadFailed {
        message: String,
    },
}

pub struct TutorClient {
    session: Arc<SessionStore>,
    gateway: Arc<Gateway>,
    calendar: Arc<CalendarSync>,
    students: Arc<StudentDirectory>,
    events: broadcast::Sender<ClientEvent>,
}

impl TutorClient {
    /// Builds a client persisting its session under `settings.session_dir`
    /// and restores any previous session from there.
    pub fn new(settings: &ClientSettings) -> Result<Self, ClientError> {
        let storage = Arc::new(FileSessionStorage::new(settings.session_dir.clone()));
        Self::with_storage(settings, storage)
    }

    pub fn with_storage(
        settings: &ClientSettings,
        storage: Arc<dyn SessionStorage>,
    ) -> Result<Self, ClientError> {
        let (events, _) = broadcast::channel(1024);
        let session = Arc::new(SessionStore::new(storage, events.clone()));
        let gateway = Gateway::new(settings, Arc::clone(&session))?;
        let calendar = Arc::new(CalendarSync::new(gateway.clone(), events.clone()));
        let students = Arc::new(StudentDirectory::new(gateway.clone(), events.clone()));

        let status = session.restore();
        info!(api_url = %gateway.base_url(), status = %status, "client: initialised");

        Ok(Self {
            session,
            gateway,
            calendar,
            students,
            events,
        })
    }

    pub async fn login(&self, form: &LoginForm) -> Result<Identity, ClientError> {
        form.validate()?;
        self.session
            .login(self.gateway.as_ref(), &form.email, &form.password)
            .await
    }

    pub async fn signup(&self, form: &SignupForm) -> Result<Identity, ClientError> {
        form.validate()?;
        self.session
            .signup(self.gateway.as_ref(), &form.email, &form.password, &form.name)
            .await
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn calendar(&self) -> &Arc<CalendarSync> {
        &self.calendar
    }

    pub fn students(&self) -> &Arc<StudentDirectory> {
        &self.students
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}
