//! Calendar view-model kept in step with whatever date window the view shows.
//!
//! Every reported [`VisibleRange`] triggers one range query. Results replace
//! the whole event set; a response that arrives after a newer range was
//! reported is dropped, so the display always matches the latest window.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use shared::{
    domain::{LessonId, LessonStatus},
    protocol::LessonRecord,
};
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{error::ClientError, ClientEvent};

pub const DEFAULT_LESSON_TITLE: &str = "Заняття";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventColor {
    Planned,
    Settled,
}

impl EventColor {
    pub fn for_status(status: LessonStatus) -> Self {
        if status.is_planned() {
            EventColor::Planned
        } else {
            EventColor::Settled
        }
    }

    pub fn hex(self) -> &'static str {
        match self {
            EventColor::Planned => "#3B82F6",
            EventColor::Settled => "#10B981",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: LessonId,
    pub title: String,
    pub start: String,
    pub end: String,
    pub color: EventColor,
}

impl CalendarEvent {
    pub fn from_lesson(lesson: &LessonRecord) -> Self {
        let title = lesson
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .unwrap_or(DEFAULT_LESSON_TITLE)
            .to_string();
        Self {
            id: lesson.id,
            title,
            start: lesson.start_time.clone(),
            end: lesson.end_time.clone(),
            color: EventColor::for_status(lesson.status),
        }
    }

    pub fn background_color(&self) -> &'static str {
        self.color.hex()
    }

    pub fn border_color(&self) -> &'static str {
        "transparent"
    }
}

pub fn project(lessons: &[LessonRecord]) -> Vec<CalendarEvent> {
    lessons.iter().map(CalendarEvent::from_lesson).collect()
}

/// A visible date window as the view reported it. The original strings are
/// what goes on the wire; the parsed instants only guard `start < end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRange {
    start: String,
    end: String,
    start_at: DateTime<FixedOffset>,
    end_at: DateTime<FixedOffset>,
}

impl VisibleRange {
    pub fn parse(start: &str, end: &str) -> Result<Self, ClientError> {
        let start_at = parse_bound(start)?;
        let end_at = parse_bound(end)?;
        if start_at >= end_at {
            return Err(ClientError::Validation(format!(
                "visible range start '{start}' must be before end '{end}'"
            )));
        }
        Ok(Self {
            start: start.trim().to_string(),
            end: end.trim().to_string(),
            start_at,
            end_at,
        })
    }

    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Result<Self, ClientError> {
        Self::parse(&start.to_rfc3339(), &end.to_rfc3339())
    }

    /// Monday-to-Monday week containing `day`, midnight in `offset`.
    pub fn week_containing(day: NaiveDate, offset: FixedOffset) -> Result<Self, ClientError> {
        let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
        let start = offset
            .from_local_datetime(&monday.and_time(chrono::NaiveTime::MIN))
            .single()
            .ok_or_else(|| ClientError::Validation(format!("no local midnight on {monday}")))?;
        Self::new(start, start + Duration::days(7))
    }

    pub fn start_str(&self) -> &str {
        &self.start
    }

    pub fn end_str(&self) -> &str {
        &self.end
    }

    pub fn start_at(&self) -> DateTime<FixedOffset> {
        self.start_at
    }

    pub fn end_at(&self) -> DateTime<FixedOffset> {
        self.end_at
    }
}

/// Accepts RFC 3339, an offset-less date-time, or a bare date. Values without
/// an offset are compared as UTC wall time.
fn parse_bound(raw: &str) -> Result<DateTime<FixedOffset>, ClientError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed);
    }
    let utc = FixedOffset::east_opt(0).ok_or_else(|| ClientError::Validation("utc offset".into()))?;
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|date| date.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| ClientError::Validation(format!("'{raw}' is not an ISO date or date-time")))?;
    utc.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| ClientError::Validation(format!("'{raw}' is not a valid instant")))
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn lessons_in_range(&self, range: &VisibleRange)
        -> Result<Vec<LessonRecord>, ClientError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Applied { events: usize },
    /// A newer range was reported before this response arrived.
    Superseded,
    /// Previous events stay on display.
    Failed { message: String },
}

#[derive(Default)]
struct CalendarView {
    range: Option<VisibleRange>,
    events: Vec<CalendarEvent>,
    applied_sequence: u64,
}

pub struct CalendarSync {
    source: Arc<dyn ScheduleSource>,
    sequence: AtomicU64,
    view: RwLock<CalendarView>,
    events: broadcast::Sender<ClientEvent>,
}

impl CalendarSync {
    pub fn new(source: Arc<dyn ScheduleSource>, events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            source,
            sequence: AtomicU64::new(0),
            view: RwLock::new(CalendarView::default()),
            events,
        }
    }

    pub async fn on_range_changed(&self, range: VisibleRange) -> SyncOutcome {
        let sequence = self.begin(&range);
        self.complete(sequence, range).await
    }

    /// Claims the next sequence number for `range`. Ordering is fixed here,
    /// at report time, not when the query is first polled.
    pub fn begin(&self, range: &VisibleRange) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            sequence,
            start = range.start_str(),
            end = range.end_str(),
            "calendar: range query dispatched"
        );
        sequence
    }

    /// Runs the query for a range claimed with [`Self::begin`] and applies
    /// the result unless a newer range was claimed meanwhile.
    pub async fn complete(&self, sequence: u64, range: VisibleRange) -> SyncOutcome {
        let result = self.source.lessons_in_range(&range).await;

        let mut view = self.view.write().await;
        let latest = self.sequence.load(Ordering::SeqCst);
        if sequence != latest {
            debug!(sequence, latest, "calendar: discarding superseded range response");
            return SyncOutcome::Superseded;
        }

        match result {
            Ok(lessons) => {
                view.events = project(&lessons);
                view.range = Some(range);
                view.applied_sequence = sequence;
                let count = view.events.len();
                info!(sequence, events = count, "calendar: events replaced");
                let _ = self.events.send(ClientEvent::CalendarUpdated { events: count });
                SyncOutcome::Applied { events: count }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(
                    sequence,
                    start = range.start_str(),
                    end = range.end_str(),
                    error = %message,
                    "calendar: range query failed; keeping previous events"
                );
                let _ = self.events.send(ClientEvent::CalendarSyncFailed {
                    start: range.start_str().to_string(),
                    end: range.end_str().to_string(),
                    message: message.clone(),
                });
                SyncOutcome::Failed { message }
            }
        }
    }

    /// Reports `range` now and runs its query on the runtime, so the caller
    /// can keep reporting ranges while earlier queries are still in flight.
    pub fn spawn_range_change(self: &Arc<Self>, range: VisibleRange) -> JoinHandle<SyncOutcome> {
        let sequence = self.begin(&range);
        let sync = Arc::clone(self);
        tokio::spawn(async move { sync.complete(sequence, range).await })
    }

    pub async fn events(&self) -> Vec<CalendarEvent> {
        self.view.read().await.events.clone()
    }

    /// Range of the event set currently on display.
    pub async fn displayed_range(&self) -> Option<VisibleRange> {
        self.view.read().await.range.clone()
    }

    pub async fn applied_sequence(&self) -> u64 {
        self.view.read().await.applied_sequence
    }
}

#[cfg(test)]
#[path = "tests/calendar_tests.rs"]
mod tests;
