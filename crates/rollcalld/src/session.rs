//! Live attendance session controller.
//!
//! Owns the Idle → Initializing → Active → Ending lifecycle: acquires the
//! capture engine, starts a remote session, holds the roster in memory, and
//! turns capture ticks and manual overrides into attendance marks that are
//! submitted immediately when online or queued locally otherwise.

use crate::engine::{EngineError, EngineHandle};
use chrono::Utc;
use rollcall_api::time::time_of_day;
use rollcall_api::{ApiError, AttendanceService, SessionInfo, StudentMark};
use rollcall_core::{validate_roster, AttendanceStatus, Enrollment, EuclideanMatcher, Matcher, RosterError};
use rollcall_store::{NewAttendanceIntent, OfflineQueue};
use rollcall_sync::Connectivity;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("service error: {0}")]
    Api(#[from] ApiError),
    #[error("roster rejected: {0}")]
    Roster(#[from] RosterError),
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no active session")]
    NotActive,
    #[error("student {0} is not on the session roster")]
    UnknownStudent(String),
}

/// How a mark left the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the remote service during this call.
    Submitted,
    /// Persisted to the offline queue for the sync engine.
    Queued,
    /// Both submit and enqueue failed; the mark is gone.
    Lost,
}

/// Outcome of one capture tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No session active.
    Inactive,
    /// A previous tick is still in flight.
    Busy,
    /// The session ended while this tick was capturing.
    Stale,
    /// Capture or extraction failed; logged, session continues.
    Failed,
    NoFace,
    NoMatch,
    /// Matched a student already marked this session.
    AlreadyMarked(String),
    Marked {
        student_id: String,
        delivery: Delivery,
    },
}

/// What a finished session recorded.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub marked: usize,
}

struct ActiveSession {
    info: SessionInfo,
    roster: Vec<Enrollment>,
    /// Last recorded status per student; manual overrides overwrite.
    marks: HashMap<String, AttendanceStatus>,
}

pub struct SessionController<S> {
    engine: EngineHandle,
    api: Arc<S>,
    queue: OfflineQueue,
    connectivity: Arc<Connectivity>,
    matcher: EuclideanMatcher,
    threshold: f32,
    active: Mutex<Option<ActiveSession>>,
    /// Bumped on end(); ticks that started under an older epoch discard
    /// their result.
    epoch: AtomicU64,
    tick_busy: AtomicBool,
}

impl<S: AttendanceService> SessionController<S> {
    pub fn new(
        engine: EngineHandle,
        api: Arc<S>,
        queue: OfflineQueue,
        connectivity: Arc<Connectivity>,
        threshold: f32,
    ) -> Self {
        Self {
            engine,
            api,
            queue,
            connectivity,
            matcher: EuclideanMatcher,
            threshold,
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
            tick_busy: AtomicBool::new(false),
        }
    }

    /// Start a session for `class_id`: warm the engine, open the camera,
    /// start the remote session and fetch the roster. Any failure releases
    /// the camera and leaves the controller idle.
    pub async fn start(&self, class_id: &str) -> Result<SessionInfo, SessionError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        self.engine.open().await?;

        let info = match self.api.start_session(class_id).await {
            Ok(info) => info,
            Err(e) => {
                self.unwind().await;
                return Err(e.into());
            }
        };

        let roster = match self.api.fetch_roster(class_id).await {
            Ok(roster) => roster,
            Err(e) => {
                self.unwind().await;
                return Err(e.into());
            }
        };

        if let Err(e) = validate_roster(&roster) {
            self.unwind().await;
            return Err(e.into());
        }

        self.connectivity.set_online(true);
        tracing::info!(
            session_id = %info.session_id,
            class_id,
            roster = roster.len(),
            "session active"
        );

        *active = Some(ActiveSession {
            info: info.clone(),
            roster,
            marks: HashMap::new(),
        });
        Ok(info)
    }

    async fn unwind(&self) {
        if let Err(e) = self.engine.close().await {
            tracing::warn!(error = %e, "engine close during unwind failed");
        }
    }

    /// One capture pass: frame → embedding → roster match → record.
    /// Never fails the session; capture problems are logged and reported as
    /// [`TickOutcome::Failed`].
    pub async fn tick(&self) -> TickOutcome {
        if self
            .tick_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TickOutcome::Busy;
        }
        let outcome = self.tick_inner().await;
        self.tick_busy.store(false, Ordering::SeqCst);
        outcome
    }

    async fn tick_inner(&self) -> TickOutcome {
        if self.active.lock().await.is_none() {
            return TickOutcome::Inactive;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);

        // Capture without holding the session lock; extraction can take
        // most of the tick interval.
        let embedding = match self.engine.capture().await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "capture tick failed");
                return TickOutcome::Failed;
            }
        };

        let mut guard = self.active.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return TickOutcome::Stale;
        }
        let Some(session) = guard.as_mut() else {
            return TickOutcome::Inactive;
        };

        let Some(embedding) = embedding else {
            return TickOutcome::NoFace;
        };

        let Some(found) = self
            .matcher
            .best_match(&embedding, &session.roster, self.threshold)
        else {
            return TickOutcome::NoMatch;
        };

        if session.marks.contains_key(&found.student_id) {
            return TickOutcome::AlreadyMarked(found.student_id);
        }

        tracing::info!(
            student_id = %found.student_id,
            roll_no = %found.roll_no,
            distance = found.distance,
            "student recognized"
        );
        let delivery = self
            .deliver(session, found.student_id.clone(), AttendanceStatus::Present)
            .await;
        TickOutcome::Marked {
            student_id: found.student_id,
            delivery,
        }
    }

    /// Record a status for a student without matching. Last write wins; the
    /// student must be on the session roster.
    pub async fn mark_manual(
        &self,
        student_id: &str,
        status: AttendanceStatus,
    ) -> Result<Delivery, SessionError> {
        let mut guard = self.active.lock().await;
        let session = guard.as_mut().ok_or(SessionError::NotActive)?;

        if !session.roster.iter().any(|e| e.student_id == student_id) {
            return Err(SessionError::UnknownStudent(student_id.to_string()));
        }

        tracing::info!(student_id, status = %status, "manual mark");
        Ok(self.deliver(session, student_id.to_string(), status).await)
    }

    /// Record the mark locally, then submit immediately when online or fall
    /// back to the durable queue. Enqueue failure is the only path that
    /// loses a mark and is logged at error level.
    async fn deliver(
        &self,
        session: &mut ActiveSession,
        student_id: String,
        status: AttendanceStatus,
    ) -> Delivery {
        session.marks.insert(student_id.clone(), status);

        let time = time_of_day();
        let captured_offline = !self.connectivity.is_online();

        if !captured_offline {
            let mark = StudentMark {
                student_id: student_id.clone(),
                status,
                time: time.clone(),
                captured_offline: false,
            };
            match self
                .api
                .mark_attendance(&session.info.session_id, &session.info.class_id, vec![mark])
                .await
            {
                Ok(resp) if resp.all_accepted() => {
                    self.connectivity.set_online(true);
                    return Delivery::Submitted;
                }
                Ok(resp) => {
                    tracing::warn!(
                        student_id = %student_id,
                        results = resp.results.len(),
                        "mark rejected by service; queuing for retry"
                    );
                }
                Err(e) => {
                    if matches!(e, ApiError::Transport(_)) {
                        self.connectivity.set_online(false);
                    }
                    tracing::warn!(student_id = %student_id, error = %e, "mark submit failed; queuing");
                }
            }
        }

        let intent = NewAttendanceIntent {
            session_id: session.info.session_id.clone(),
            class_id: session.info.class_id.clone(),
            student_id: student_id.clone(),
            status,
            time,
            captured_offline,
            enqueued_at: Utc::now(),
        };
        match self.queue.enqueue_attendance(intent).await {
            Ok(id) => {
                tracing::debug!(student_id = %student_id, queue_id = id, "mark queued");
                Delivery::Queued
            }
            Err(e) => {
                tracing::error!(student_id = %student_id, error = %e, "mark lost: queue write failed");
                Delivery::Lost
            }
        }
    }

    /// End the active session: release the camera, tell the service, return
    /// to idle. The end-session call is best-effort; the server closes
    /// abandoned sessions on its own.
    pub async fn end(&self) -> Result<SessionSummary, SessionError> {
        let session = {
            let mut guard = self.active.lock().await;
            let session = guard.take().ok_or(SessionError::NotActive)?;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            session
        };

        if let Err(e) = self.engine.close().await {
            tracing::warn!(error = %e, "engine close failed");
        }

        if let Err(e) = self.api.end_session(&session.info.session_id).await {
            tracing::warn!(
                session_id = %session.info.session_id,
                error = %e,
                "end-session call failed; server will close it"
            );
        }

        let summary = SessionSummary {
            session_id: session.info.session_id,
            marked: session.marks.len(),
        };
        tracing::info!(
            session_id = %summary.session_id,
            marked = summary.marked,
            "session ended"
        );
        Ok(summary)
    }

    /// Whether a session is currently active.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }
}
