use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identifier accepted from the backend as either a JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<i64> for Id {
    fn from(raw: i64) -> Self {
        Self(raw.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Id(s),
            Raw::Signed(n) => Id(n.to_string()),
            Raw::Unsigned(n) => Id(n.to_string()),
        })
    }
}

/// Position of the last event the poller has observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollCursor(DateTime<Utc>);

impl PollCursor {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Wire form sent as the `since` query parameter.
    pub fn to_query(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    }
}

impl fmt::Display for PollCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// One backend occurrence, e.g. a new application submitted for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(alias = "job_id")]
    pub subject_id: Id,
    #[serde(alias = "created_at", deserialize_with = "utc_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "job_title")]
    pub title: Option<String>,
    #[serde(default, alias = "applicant_name")]
    pub actor: Option<String>,
}

/// RFC 3339 timestamps, or offset-less ones (`2024-03-01T10:00:00.123456`)
/// read as UTC.
fn utc_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

impl NotificationEvent {
    pub fn cursor(&self) -> PollCursor {
        PollCursor(self.timestamp)
    }

    /// Human-readable line describing the event's subject.
    pub fn describe(&self) -> String {
        let subject = match &self.title {
            Some(title) if !title.trim().is_empty() => format!("\"{}\"", title.trim()),
            _ => format!("job {}", self.subject_id),
        };
        match &self.actor {
            Some(actor) if !actor.trim().is_empty() => {
                format!("New application from {} for {}", actor.trim(), subject)
            }
            _ => format!("New application received for {}", subject),
        }
    }
}

/// Transient user-facing notice produced exactly once per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject_id: Id,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&NotificationEvent> for Notification {
    fn from(event: &NotificationEvent) -> Self {
        Self {
            subject_id: event.subject_id.clone(),
            message: event.describe(),
            at: event.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Entitlement {
    NotEnrolled,
    Enrolled,
}

impl Entitlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entitlement::NotEnrolled => "not-enrolled",
            Entitlement::Enrolled => "enrolled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enrollment {
    #[serde(alias = "course")]
    pub course_id: Id,
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lesson {
    pub id: Id,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

impl Lesson {
    /// Statically-known media URL, ignoring blanks.
    pub fn static_url(&self) -> Option<&str> {
        self.video_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Course {
    pub id: Id,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

impl Course {
    pub fn lesson(&self, id: &Id) -> Option<&Lesson> {
        self.lessons.iter().find(|l| &l.id == id)
    }

    pub fn free_lesson_count(&self) -> usize {
        self.lessons.iter().filter(|l| l.is_free).count()
    }
}

/// Upsell data carried by a locked lesson.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedInfo {
    pub course_id: Id,
    pub course_title: String,
    pub lesson_id: Id,
    pub price: f64,
    pub total_lessons: usize,
    pub free_lessons: usize,
}

impl LockedInfo {
    pub fn for_lesson(course: &Course, lesson_id: &Id) -> Self {
        Self {
            course_id: course.id.clone(),
            course_title: course.title.clone(),
            lesson_id: lesson_id.clone(),
            price: course.price,
            total_lessons: course.lessons.len(),
            free_lessons: course.free_lesson_count(),
        }
    }
}

/// Outcome of access gating for the selected lesson.
#[derive(Debug, Clone, PartialEq)]
pub enum Playback {
    Idle,
    Resolving { lesson_id: Id },
    Playable { lesson_id: Id, url: String },
    Locked(LockedInfo),
    Unavailable { lesson_id: Id },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_accepts_backend_aliases() {
        let ev: NotificationEvent = serde_json::from_value(json!({
            "job_id": 7,
            "created_at": "2024-03-01T10:00:00Z",
            "job_title": "Senior Architect",
            "applicant_name": "Sam"
        }))
        .unwrap();
        assert_eq!(ev.subject_id, Id::from(7));
        assert_eq!(ev.describe(), "New application from Sam for \"Senior Architect\"");
    }

    #[test]
    fn event_accepts_timestamps_without_offset() {
        let ev: NotificationEvent = serde_json::from_str(
            r#"{"job_id":7,"created_at":"2024-03-01T10:00:00.123456"}"#,
        )
        .unwrap();
        assert_eq!(
            ev.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
                + chrono::Duration::microseconds(123_456)
        );

        let spaced: NotificationEvent = serde_json::from_str(
            r#"{"job_id":7,"created_at":"2024-03-01 10:00:00"}"#,
        )
        .unwrap();
        assert_eq!(spaced.timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());

        let offset: NotificationEvent = serde_json::from_str(
            r#"{"job_id":7,"created_at":"2024-03-01T12:00:00+02:00"}"#,
        )
        .unwrap();
        assert_eq!(offset.timestamp, spaced.timestamp);

        assert!(serde_json::from_str::<NotificationEvent>(
            r#"{"job_id":7,"created_at":"yesterday"}"#
        )
        .is_err());
    }

    #[test]
    fn event_without_payload_names_subject() {
        let ev: NotificationEvent = serde_json::from_value(json!({
            "subject_id": "job-9",
            "timestamp": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(ev.describe(), "New application received for job job-9");
    }

    #[test]
    fn cursor_orders_by_time() {
        let a: NotificationEvent = serde_json::from_value(json!({
            "subject_id": 1, "timestamp": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        let b: NotificationEvent = serde_json::from_value(json!({
            "subject_id": 1, "timestamp": "2024-03-01T10:00:01Z"
        }))
        .unwrap();
        assert!(a.cursor() < b.cursor());
        assert_eq!(a.cursor().to_query(), "2024-03-01T10:00:00.000000Z");
    }

    #[test]
    fn locked_info_counts_lessons() {
        let course: Course = serde_json::from_value(json!({
            "id": 3,
            "title": "Parametric Design",
            "price": 49.0,
            "lessons": [
                {"id": 1, "title": "Intro", "is_free": true},
                {"id": 2, "title": "Grasshopper", "video_url": "  "},
                {"id": 3, "title": "Facades"}
            ]
        }))
        .unwrap();
        let info = LockedInfo::for_lesson(&course, &Id::from(2));
        assert_eq!(info.total_lessons, 3);
        assert_eq!(info.free_lessons, 1);
        assert_eq!(info.price, 49.0);
        assert_eq!(course.lesson(&Id::from(2)).unwrap().static_url(), None);
    }
}
