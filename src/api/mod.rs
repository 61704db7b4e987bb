//! REST collaborator: the traits the poller and resolver depend on, and the
//! reqwest-backed implementation that talks to the marketplace backend.
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::api::model::{EnrollReq, EventsResp, MediaResp};
use crate::config::Config;
use crate::model::{Course, Enrollment, Id, NotificationEvent, PollCursor};

pub mod model;

const EVENTS_PATH: &str = "api/admin/job-applications/notifications";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("credential rejected by backend")]
    Unauthorized,
    #[error("resource not found")]
    NotFound,
    #[error("backend error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Network failures and 5xx responses; worth retrying on the next trigger.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Feed of backend occurrences consumed by the poller.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events strictly after `cursor` in ascending timestamp order. `None` asks
    /// for the feed from its beginning.
    async fn events_since(
        &self,
        token: &str,
        cursor: Option<&PollCursor>,
    ) -> Result<Vec<NotificationEvent>, ApiError>;
}

/// Course, media and enrollment lookups used by the gated resolver.
#[async_trait]
pub trait CourseBackend: Send + Sync {
    async fn fetch_course(&self, token: Option<&str>, course_id: &Id) -> Result<Course, ApiError>;

    /// Dynamic media reference for a lesson. `Ok(None)` when the backend has none.
    async fn resolve_media(
        &self,
        token: Option<&str>,
        lesson_id: &Id,
    ) -> Result<Option<String>, ApiError>;

    /// `Ok(None)` when the viewer has no enrollment for the course.
    async fn lookup_enrollment(
        &self,
        token: &str,
        course_id: &Id,
    ) -> Result<Option<Enrollment>, ApiError>;

    async fn enroll(&self, token: &str, course_id: &Id) -> Result<Enrollment, ApiError>;
}

#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("archhub-watch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ApiError> {
        let base_url = cfg
            .base_url()
            .map_err(|err| ApiError::InvalidUrl(err.to_string()))?;
        Self::new(base_url, cfg.request_timeout())
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|err| ApiError::InvalidUrl(format!("{}: {}", path, err)))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        let mut builder = self
            .http
            .request(method, self.endpoint(path)?)
            .header("Accept", "application/json");
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    pub fn build_events_request(
        &self,
        token: &str,
        cursor: Option<&PollCursor>,
    ) -> Result<reqwest::Request, ApiError> {
        let mut builder = self.request(Method::GET, EVENTS_PATH, Some(token))?;
        if let Some(cursor) = cursor {
            builder = builder.query(&[("since", cursor.to_query())]);
        }
        Ok(builder.build()?)
    }

    pub fn build_media_request(
        &self,
        token: Option<&str>,
        lesson_id: &Id,
    ) -> Result<reqwest::Request, ApiError> {
        let path = format!("api/lessons/{}/video", lesson_id);
        Ok(self.request(Method::GET, &path, token)?.build()?)
    }

    pub fn build_course_request(
        &self,
        token: Option<&str>,
        course_id: &Id,
    ) -> Result<reqwest::Request, ApiError> {
        let path = format!("api/courses/{}", course_id);
        Ok(self.request(Method::GET, &path, token)?.build()?)
    }

    pub fn build_enrollment_lookup(
        &self,
        token: &str,
        course_id: &Id,
    ) -> Result<reqwest::Request, ApiError> {
        let path = format!("api/enrollments/{}", course_id);
        Ok(self.request(Method::GET, &path, Some(token))?.build()?)
    }

    pub fn build_enroll_request(
        &self,
        token: &str,
        course_id: &Id,
    ) -> Result<reqwest::Request, ApiError> {
        Ok(self
            .request(Method::POST, "api/enrollments", Some(token))?
            .json(&EnrollReq { course_id })
            .build()?)
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T, ApiError> {
        let method = request.method().clone();
        let url = request.url().clone();
        let res = self.http.execute(request).await?;
        let status = res.status();
        debug!(%method, %url, %status, "backend response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%method, %url, %status, "backend error");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl EventSource for HttpBackend {
    #[instrument(skip_all, fields(cursor = ?cursor))]
    async fn events_since(
        &self,
        token: &str,
        cursor: Option<&PollCursor>,
    ) -> Result<Vec<NotificationEvent>, ApiError> {
        let request = self.build_events_request(token, cursor)?;
        let resp: EventsResp = self.execute(request).await?;
        Ok(resp.into_events())
    }
}

#[async_trait]
impl CourseBackend for HttpBackend {
    #[instrument(skip_all, fields(%course_id))]
    async fn fetch_course(&self, token: Option<&str>, course_id: &Id) -> Result<Course, ApiError> {
        let request = self.build_course_request(token, course_id)?;
        self.execute(request).await
    }

    #[instrument(skip_all, fields(%lesson_id))]
    async fn resolve_media(
        &self,
        token: Option<&str>,
        lesson_id: &Id,
    ) -> Result<Option<String>, ApiError> {
        let request = self.build_media_request(token, lesson_id)?;
        let resp: MediaResp = self.execute(request).await?;
        Ok(resp.video_url.filter(|url| !url.trim().is_empty()))
    }

    #[instrument(skip_all, fields(%course_id))]
    async fn lookup_enrollment(
        &self,
        token: &str,
        course_id: &Id,
    ) -> Result<Option<Enrollment>, ApiError> {
        let request = self.build_enrollment_lookup(token, course_id)?;
        match self.execute(request).await {
            Ok(record) => Ok(Some(record)),
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, fields(%course_id))]
    async fn enroll(&self, token: &str, course_id: &Id) -> Result<Enrollment, ApiError> {
        let request = self.build_enroll_request(token, course_id)?;
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(Url::parse(base).unwrap(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn events_request_without_cursor_has_no_since() {
        let b = backend("http://localhost:8000/");
        let req = b.build_events_request("tok", None).unwrap();
        assert_eq!(
            req.url().as_str(),
            "http://localhost:8000/api/admin/job-applications/notifications"
        );
        assert_eq!(req.headers()["authorization"], "Bearer tok");
        assert_eq!(req.method(), &Method::GET);
    }

    #[test]
    fn events_request_carries_cursor() {
        let b = backend("http://localhost:8000/");
        let cursor = PollCursor::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        let req = b.build_events_request("tok", Some(&cursor)).unwrap();
        let since: Vec<(String, String)> = req
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            since,
            vec![("since".to_string(), "2024-03-01T10:00:00.000000Z".to_string())]
        );
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let b = backend("https://example.com/backend/");
        let req = b.build_media_request(None, &Id::from(12)).unwrap();
        assert_eq!(req.url().as_str(), "https://example.com/backend/api/lessons/12/video");
        assert!(req.headers().get("authorization").is_none());
    }

    #[test]
    fn enroll_request_posts_course_id() {
        let b = backend("http://localhost:8000/");
        let req = b.build_enroll_request("tok", &Id::from("c-1")).unwrap();
        assert_eq!(req.method(), &Method::POST);
        assert_eq!(req.url().path(), "/api/enrollments");
        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(value, json!({ "course_id": "c-1" }));
    }

    #[test]
    fn events_response_accepts_both_shapes() {
        let bare: EventsResp = serde_json::from_value(json!([
            { "job_id": 7, "created_at": "2024-03-01T10:00:00Z" }
        ]))
        .unwrap();
        assert_eq!(bare.into_events().len(), 1);

        let wrapped: EventsResp = serde_json::from_value(json!({
            "events": []
        }))
        .unwrap();
        assert!(wrapped.into_events().is_empty());
    }

    #[test]
    fn transient_classification() {
        assert!(ApiError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!ApiError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!ApiError::Unauthorized.is_transient());
    }
}
