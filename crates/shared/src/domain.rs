use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(StudentId);
id_newtype!(LessonId);

/// Lifecycle of a lesson as the service reports it. Statuses this client
/// does not know about decode as `Other` rather than failing the whole list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    #[default]
    Planned,
    Completed,
    Cancelled,
    #[serde(other)]
    Other,
}

impl LessonStatus {
    pub fn is_planned(self) -> bool {
        self == LessonStatus::Planned
    }
}
