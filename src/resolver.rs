//! Access-gated media resolver for course lessons.
//!
//! Selecting a lesson yields a playable URL, a locked state carrying upsell
//! data, or `Unavailable` when no media exists. Every selection is tagged with
//! a generation number so a late resolution for a previous lesson can never
//! overwrite the state of the lesson selected after it.
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, CourseBackend};
use crate::auth::CredentialProvider;
use crate::model::{Course, Enrollment, Entitlement, Id, Lesson, LockedInfo, Playback};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lesson {lesson} is not part of course {course}")]
    UnknownLesson { course: Id, lesson: Id },
    #[error("sign-in required")]
    MissingCredential,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Applied(Playback),
    /// A newer selection or entitlement change arrived first; result dropped.
    Superseded,
}

#[derive(Debug)]
struct State {
    selected: Option<Id>,
    generation: u64,
    entitlement: Entitlement,
    playback: Playback,
}

pub struct GatedResolver {
    backend: Arc<dyn CourseBackend>,
    credentials: Arc<dyn CredentialProvider>,
    course: Course,
    state: Mutex<State>,
}

/// Map an enrollment lookup to an entitlement. Missing or rejected credentials
/// read as not enrolled.
async fn lookup_entitlement(
    backend: &dyn CourseBackend,
    token: Option<&str>,
    course_id: &Id,
) -> Result<Entitlement, ApiError> {
    let Some(token) = token else {
        return Ok(Entitlement::NotEnrolled);
    };
    match backend.lookup_enrollment(token, course_id).await {
        Ok(Some(_)) => Ok(Entitlement::Enrolled),
        Ok(None) | Err(ApiError::Unauthorized) => Ok(Entitlement::NotEnrolled),
        Err(err) => Err(err),
    }
}

impl GatedResolver {
    pub fn new(
        backend: Arc<dyn CourseBackend>,
        credentials: Arc<dyn CredentialProvider>,
        course: Course,
        entitlement: Entitlement,
    ) -> Self {
        Self {
            backend,
            credentials,
            course,
            state: Mutex::new(State {
                selected: None,
                generation: 0,
                entitlement,
                playback: Playback::Idle,
            }),
        }
    }

    /// Fetch the course and the viewer's entitlement, then build a resolver.
    #[instrument(skip_all, fields(%course_id))]
    pub async fn load(
        backend: Arc<dyn CourseBackend>,
        credentials: Arc<dyn CredentialProvider>,
        course_id: &Id,
    ) -> Result<Self, ResolveError> {
        let token = credentials.credential();
        let course = backend.fetch_course(token.as_deref(), course_id).await?;
        let lookup = lookup_entitlement(backend.as_ref(), token.as_deref(), &course.id).await;
        let entitlement = match lookup {
            Ok(entitlement) => entitlement,
            Err(err) => {
                warn!(%err, "enrollment lookup failed; treating viewer as not enrolled");
                Entitlement::NotEnrolled
            }
        };
        info!(lessons = course.lessons.len(), entitlement = entitlement.as_str(), "course loaded");
        Ok(Self::new(backend, credentials, course, entitlement))
    }

    pub fn course(&self) -> &Course {
        &self.course
    }

    pub async fn current(&self) -> Playback {
        self.state.lock().await.playback.clone()
    }

    pub async fn entitlement(&self) -> Entitlement {
        self.state.lock().await.entitlement
    }

    pub async fn selected(&self) -> Option<Id> {
        self.state.lock().await.selected.clone()
    }

    /// Select a lesson and run the gating transition for it.
    #[instrument(skip_all, fields(%lesson_id))]
    pub async fn select(&self, lesson_id: &Id) -> Result<Resolution, ResolveError> {
        let lesson = self
            .course
            .lesson(lesson_id)
            .ok_or_else(|| ResolveError::UnknownLesson {
                course: self.course.id.clone(),
                lesson: lesson_id.clone(),
            })?;
        let (generation, entitlement) = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.selected = Some(lesson.id.clone());
            (state.generation, state.entitlement)
        };
        Ok(self.run(generation, lesson, entitlement).await)
    }

    /// Back to `Idle`; any resolution still in flight is discarded.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.selected = None;
        state.playback = Playback::Idle;
    }

    /// Record a new entitlement. When it differs from the current one and a
    /// lesson is selected, the selection is resolved again from scratch.
    pub async fn set_entitlement(&self, entitlement: Entitlement) -> Option<Resolution> {
        let (generation, lesson_id) = {
            let mut state = self.state.lock().await;
            if state.entitlement == entitlement {
                return None;
            }
            state.entitlement = entitlement;
            let lesson_id = state.selected.clone()?;
            state.generation += 1;
            (state.generation, lesson_id)
        };
        info!(entitlement = entitlement.as_str(), %lesson_id, "entitlement changed; re-resolving");
        let lesson = self.course.lesson(&lesson_id)?;
        Some(self.run(generation, lesson, entitlement).await)
    }

    /// Re-read the enrollment record. A failed lookup keeps the current value.
    #[instrument(skip_all)]
    pub async fn refresh_entitlement(&self) -> Option<Resolution> {
        let token = self.credentials.credential();
        match lookup_entitlement(self.backend.as_ref(), token.as_deref(), &self.course.id).await {
            Ok(entitlement) => self.set_entitlement(entitlement).await,
            Err(err) => {
                warn!(%err, "enrollment lookup failed; keeping current entitlement");
                None
            }
        }
    }

    /// Enroll the viewer in the course and re-resolve the current selection.
    #[instrument(skip_all)]
    pub async fn enroll(&self) -> Result<Enrollment, ResolveError> {
        let token = self
            .credentials
            .credential()
            .ok_or(ResolveError::MissingCredential)?;
        let enrollment = self.backend.enroll(&token, &self.course.id).await?;
        info!(course_id = %self.course.id, "enrolled");
        self.set_entitlement(Entitlement::Enrolled).await;
        Ok(enrollment)
    }

    async fn run(&self, generation: u64, lesson: &Lesson, entitlement: Entitlement) -> Resolution {
        let token = self.credentials.credential();
        if !lesson.is_free && (entitlement == Entitlement::NotEnrolled || token.is_none()) {
            return self.apply(generation, self.locked(lesson)).await;
        }

        let resolving = Playback::Resolving {
            lesson_id: lesson.id.clone(),
        };
        if self.apply(generation, resolving).await == Resolution::Superseded {
            return Resolution::Superseded;
        }

        let dynamic = match self.backend.resolve_media(token.as_deref(), &lesson.id).await {
            Ok(url) => url.filter(|u| !u.trim().is_empty()),
            Err(ApiError::Unauthorized) if !lesson.is_free => {
                return self.apply(generation, self.locked(lesson)).await;
            }
            Err(err) => {
                warn!(%err, lesson_id = %lesson.id, "media lookup failed; using lesson url");
                None
            }
        };

        let playback = match dynamic.or_else(|| lesson.static_url().map(str::to_string)) {
            Some(url) => Playback::Playable {
                lesson_id: lesson.id.clone(),
                url,
            },
            None => Playback::Unavailable {
                lesson_id: lesson.id.clone(),
            },
        };
        self.apply(generation, playback).await
    }

    fn locked(&self, lesson: &Lesson) -> Playback {
        Playback::Locked(LockedInfo::for_lesson(&self.course, &lesson.id))
    }

    async fn apply(&self, generation: u64, playback: Playback) -> Resolution {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(generation, current = state.generation, "discarding stale resolution");
            return Resolution::Superseded;
        }
        state.playback = playback.clone();
        Resolution::Applied(playback)
    }
}
