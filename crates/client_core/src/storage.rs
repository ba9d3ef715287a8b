//! Durable home of the session: an opaque bearer token and the identity
//! record it was issued for. The two keys are always written and cleared
//! together.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use shared::protocol::Identity;
use thiserror::Error;

pub const TOKEN_KEY: &str = "access_token";
pub const IDENTITY_KEY: &str = "user";

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSession {
    pub access_token: String,
    pub user: Identity,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session storage i/o failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("persisted session is malformed: {0}")]
    Malformed(String),
}

pub trait SessionStorage: Send + Sync {
    /// `Ok(None)` when nothing is persisted. A half-written pair is reported
    /// as `Malformed` so the caller can clear it.
    fn load(&self) -> Result<Option<PersistedSession>, StorageError>;
    fn save(&self, session: &PersistedSession) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// Keeps each key in its own file inside `dir`.
pub struct FileSessionStorage {
    dir: PathBuf,
}

impl FileSessionStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_KEY)
    }

    fn identity_path(&self) -> PathBuf {
        self.dir.join(format!("{IDENTITY_KEY}.json"))
    }

    fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn write_staged(path: &Path, contents: &[u8]) -> Result<PathBuf, StorageError> {
        let staged = path.with_extension("tmp");
        fs::write(&staged, contents).map_err(|source| StorageError::Io {
            path: staged.clone(),
            source,
        })?;
        restrict_permissions(&staged)?;
        Ok(staged)
    }

    fn install(staged: &Path, target: &Path) -> Result<(), StorageError> {
        fs::rename(staged, target).map_err(|source| StorageError::Io {
            path: target.to_path_buf(),
            source,
        })
    }

    fn remove_if_present(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        let token = Self::read_optional(&self.token_path())?;
        let identity = Self::read_optional(&self.identity_path())?;

        match (token, identity) {
            (None, None) => Ok(None),
            (Some(token), Some(identity)) => {
                let user = serde_json::from_str::<Identity>(&identity)
                    .map_err(|err| StorageError::Malformed(format!("identity record: {err}")))?;
                Ok(Some(PersistedSession {
                    access_token: token.trim().to_string(),
                    user,
                }))
            }
            (Some(_), None) => Err(StorageError::Malformed(
                "token present without identity".into(),
            )),
            (None, Some(_)) => Err(StorageError::Malformed(
                "identity present without token".into(),
            )),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let identity = serde_json::to_vec_pretty(&session.user)
            .map_err(|err| StorageError::Malformed(format!("identity record: {err}")))?;

        let staged_token = Self::write_staged(&self.token_path(), session.access_token.as_bytes())?;
        let staged_identity = Self::write_staged(&self.identity_path(), &identity)?;

        if let Err(err) = Self::install(&staged_token, &self.token_path()) {
            let _ = fs::remove_file(&staged_token);
            let _ = fs::remove_file(&staged_identity);
            return Err(err);
        }
        if let Err(err) = Self::install(&staged_identity, &self.identity_path()) {
            // A new token must not sit next to the previous identity.
            let _ = fs::remove_file(self.token_path());
            let _ = fs::remove_file(&staged_identity);
            return Err(err);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let token = Self::remove_if_present(&self.token_path());
        let identity = Self::remove_if_present(&self.identity_path());
        token.and(identity)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

/// Process-local storage, used by tests and by embedders that persist the
/// session elsewhere.
#[derive(Default)]
pub struct MemorySessionStorage {
    inner: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            inner: Mutex::new(Some(session)),
        }
    }

    pub fn snapshot(&self) -> Option<PersistedSession> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        Ok(self.snapshot())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
