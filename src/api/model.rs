use serde::{Deserialize, Serialize};

use crate::model::{Id, NotificationEvent};

#[derive(Debug, Deserialize)]
pub struct MediaResp {
    #[serde(default, alias = "url")]
    pub video_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrollReq<'a> {
    pub course_id: &'a Id,
}

/// Event feeds come back either bare or wrapped in `{"events": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventsResp {
    Bare(Vec<NotificationEvent>),
    Wrapped { events: Vec<NotificationEvent> },
}

impl EventsResp {
    pub fn into_events(self) -> Vec<NotificationEvent> {
        match self {
            EventsResp::Bare(events) | EventsResp::Wrapped { events } => events,
        }
    }
}
