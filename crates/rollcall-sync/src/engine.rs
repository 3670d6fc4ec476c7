use crate::connectivity::Connectivity;
use rollcall_api::{ApiError, AttendanceService, EnrollRequest, StudentMark};
use rollcall_store::{AttendanceIntent, OfflineQueue};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Intents accepted by the remote service this pass.
    pub submitted: usize,
    /// Intents left pending for the next pass.
    pub failed: usize,
}

/// Pending intents for one (session, class) pair, submitted as one batch.
struct Group {
    session_id: String,
    class_id: String,
    intents: Vec<AttendanceIntent>,
}

/// Background sync engine draining the offline queue to the remote service.
///
/// One instance per client process. Drains are triggered by a periodic
/// timer, by connectivity-regained events, and manually; an atomic flag
/// guarantees at most one concurrent pass. Failures never escalate past a
/// log line — pending intents are simply retried on the next pass, and the
/// remote endpoint's idempotency absorbs resubmission after partial
/// failures.
pub struct SyncEngine<S> {
    queue: OfflineQueue,
    api: Arc<S>,
    connectivity: Arc<Connectivity>,
    draining: AtomicBool,
    sync_interval: Duration,
    retention: chrono::Duration,
}

impl<S: AttendanceService + Send + Sync + 'static> SyncEngine<S> {
    pub fn new(
        queue: OfflineQueue,
        api: Arc<S>,
        connectivity: Arc<Connectivity>,
        sync_interval: Duration,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            queue,
            api,
            connectivity,
            draining: AtomicBool::new(false),
            sync_interval,
            retention,
        }
    }

    /// One drain pass. No-op while offline or while another pass runs.
    pub async fn drain(&self) -> DrainReport {
        if !self.connectivity.is_online() {
            return DrainReport::default();
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("drain already in progress, skipping");
            return DrainReport::default();
        }

        let report = self.drain_inner().await;
        self.draining.store(false, Ordering::SeqCst);

        if report.submitted > 0 || report.failed > 0 {
            tracing::info!(
                submitted = report.submitted,
                failed = report.failed,
                "drain pass complete"
            );
        }
        report
    }

    /// Run forever: drain on the interval and whenever connectivity comes
    /// back. Intended to be spawned once at client startup.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut online = self.connectivity.watch();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain().await;
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *online.borrow_and_update() {
                        tracing::info!("connectivity regained, draining queue");
                        self.drain().await;
                    }
                }
            }
        }
    }

    async fn drain_inner(&self) -> DrainReport {
        let mut report = DrainReport::default();

        let pending = match self.queue.pending_attendance().await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::error!(%error, "failed to read pending attendance queue");
                return report;
            }
        };

        for group in group_by_session(pending) {
            self.submit_group(group, &mut report).await;
        }

        self.drain_enrollments(&mut report).await;

        if let Err(error) = self.queue.prune_synced(self.retention).await {
            tracing::error!(%error, "retention prune failed");
        }

        report
    }

    async fn submit_group(&self, group: Group, report: &mut DrainReport) {
        let marks: Vec<StudentMark> = group
            .intents
            .iter()
            .map(|intent| StudentMark {
                student_id: intent.student_id.clone(),
                status: intent.status,
                time: intent.time.clone(),
                captured_offline: intent.captured_offline,
            })
            .collect();

        match self
            .api
            .mark_attendance(&group.session_id, &group.class_id, marks)
            .await
        {
            Ok(resp) => {
                self.connectivity.set_online(true);

                // A per-record `error` means remote validation rejected that
                // mark; it stays pending for the next pass. `saved` and
                // `duplicate` are both terminal success.
                let rejected: HashSet<&str> = resp
                    .results
                    .iter()
                    .filter(|r| !r.status.is_accepted())
                    .map(|r| r.student_id.as_str())
                    .collect();

                for result in resp.results.iter().filter(|r| !r.status.is_accepted()) {
                    tracing::warn!(
                        student_id = %result.student_id,
                        error = result.error.as_deref().unwrap_or("unspecified"),
                        "remote rejected attendance mark, will retry"
                    );
                }

                let (accepted, kept): (Vec<_>, Vec<_>) = group
                    .intents
                    .iter()
                    .partition(|intent| !rejected.contains(intent.student_id.as_str()));

                let ids: Vec<i64> = accepted.iter().map(|intent| intent.id).collect();
                match self.queue.mark_attendance_synced(&ids).await {
                    Ok(()) => report.submitted += ids.len(),
                    Err(error) => {
                        // Accepted remotely but still flagged pending; the
                        // retry is absorbed as `duplicate` next pass.
                        tracing::error!(%error, "failed to flag synced intents");
                        report.failed += ids.len();
                    }
                }
                report.failed += kept.len();
            }
            Err(error) => {
                if let ApiError::Transport(_) = &error {
                    self.connectivity.set_online(false);
                }
                tracing::warn!(
                    session_id = %group.session_id,
                    class_id = %group.class_id,
                    count = group.intents.len(),
                    transient = error.is_transient(),
                    %error,
                    "batch submit failed, intents retained for retry"
                );
                report.failed += group.intents.len();
            }
        }
    }

    async fn drain_enrollments(&self, report: &mut DrainReport) {
        let pending = match self.queue.pending_enrollments().await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::error!(%error, "failed to read pending enrollment queue");
                return;
            }
        };

        for intent in pending {
            let request = EnrollRequest {
                full_name: intent.full_name.clone(),
                roll_no: intent.roll_no.clone(),
                class_id: intent.class_id.clone(),
                embedding_float_array: intent.embedding.values.clone(),
                embedding_version: intent.embedding_version,
            };

            match self.api.enroll_student(request).await {
                Ok(()) => {
                    self.connectivity.set_online(true);
                    if let Err(error) = self.queue.mark_enrollments_synced(&[intent.id]).await {
                        tracing::error!(%error, "failed to flag synced enrollment");
                        report.failed += 1;
                    } else {
                        report.submitted += 1;
                    }
                }
                Err(error) if !error.is_transient() => {
                    // Permanent rejection (e.g. roll number already taken):
                    // retrying would fail forever. Flag synced so retention
                    // eventually clears it.
                    tracing::warn!(
                        intent_id = %intent.intent_id,
                        roll_no = %intent.roll_no,
                        %error,
                        "enrollment permanently rejected"
                    );
                    if let Err(error) = self.queue.mark_enrollments_synced(&[intent.id]).await {
                        tracing::error!(%error, "failed to flag rejected enrollment");
                    }
                    report.failed += 1;
                }
                Err(error) => {
                    if let ApiError::Transport(_) = &error {
                        self.connectivity.set_online(false);
                    }
                    tracing::warn!(
                        intent_id = %intent.intent_id,
                        %error,
                        "enrollment submit failed, retained for retry"
                    );
                    report.failed += 1;
                }
            }
        }
    }
}

/// Group intents by (session, class) in first-seen order; within a group,
/// insertion order is preserved.
fn group_by_session(pending: Vec<AttendanceIntent>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for intent in pending {
        match groups
            .iter_mut()
            .find(|g| g.session_id == intent.session_id && g.class_id == intent.class_id)
        {
            Some(group) => group.intents.push(intent),
            None => groups.push(Group {
                session_id: intent.session_id.clone(),
                class_id: intent.class_id.clone(),
                intents: vec![intent],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rollcall_api::{MarkResponse, MarkResult, MarkStatus, SessionInfo};
    use rollcall_core::{AttendanceStatus, Enrollment};
    use rollcall_store::NewAttendanceIntent;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct MockService {
        /// (session_id, class_id, mark count) per call.
        calls: Mutex<Vec<(String, String, usize)>>,
        /// class_ids whose batches fail with a 503.
        fail_classes: Mutex<HashSet<String>>,
        /// student_ids that get a per-record `error` result.
        reject_students: Mutex<HashSet<String>>,
        /// When set, mark_attendance blocks until notified.
        gate: Option<Arc<Notify>>,
    }

    impl AttendanceService for MockService {
        async fn start_session(&self, _class_id: &str) -> Result<SessionInfo, ApiError> {
            unimplemented!("not used by the sync engine")
        }

        async fn mark_attendance(
            &self,
            session_id: &str,
            class_id: &str,
            marks: Vec<StudentMark>,
        ) -> Result<MarkResponse, ApiError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.calls
                .lock()
                .unwrap()
                .push((session_id.into(), class_id.into(), marks.len()));

            if self.fail_classes.lock().unwrap().contains(class_id) {
                return Err(ApiError::Status {
                    status: 503,
                    message: "unavailable".into(),
                });
            }

            let rejected = self.reject_students.lock().unwrap();
            Ok(MarkResponse {
                success: true,
                results: marks
                    .iter()
                    .map(|m| MarkResult {
                        student_id: m.student_id.clone(),
                        status: if rejected.contains(&m.student_id) {
                            MarkStatus::Error
                        } else {
                            MarkStatus::Saved
                        },
                        error: None,
                    })
                    .collect(),
            })
        }

        async fn end_session(&self, _session_id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn fetch_roster(&self, _class_id: &str) -> Result<Vec<Enrollment>, ApiError> {
            Ok(Vec::new())
        }

        async fn enroll_student(&self, _request: EnrollRequest) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn intent(student: &str, session: &str, class: &str) -> NewAttendanceIntent {
        NewAttendanceIntent {
            session_id: session.into(),
            class_id: class.into(),
            student_id: student.into(),
            status: AttendanceStatus::Present,
            time: "10:00:00".into(),
            captured_offline: true,
            enqueued_at: Utc::now(),
        }
    }

    async fn engine_with(
        service: MockService,
        online: bool,
    ) -> (Arc<SyncEngine<MockService>>, OfflineQueue, Arc<MockService>) {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        let api = Arc::new(service);
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            api.clone(),
            Arc::new(Connectivity::new(online)),
            Duration::from_secs(30),
            chrono::Duration::days(7),
        ));
        (engine, queue, api)
    }

    #[tokio::test]
    async fn test_drain_is_noop_while_offline() {
        let (engine, queue, api) = engine_with(MockService::default(), false).await;
        queue.enqueue_attendance(intent("s1", "sess", "c1")).await.unwrap();

        let report = engine.drain().await;
        assert_eq!(report, DrainReport::default());
        assert!(api.calls.lock().unwrap().is_empty());
        assert_eq!(queue.pending_attendance().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_groups_by_session_and_class() {
        let (engine, queue, api) = engine_with(MockService::default(), true).await;
        queue.enqueue_attendance(intent("s1", "sess-a", "c1")).await.unwrap();
        queue.enqueue_attendance(intent("s2", "sess-a", "c1")).await.unwrap();
        queue.enqueue_attendance(intent("s3", "sess-b", "c2")).await.unwrap();

        let report = engine.drain().await;
        assert_eq!(report.submitted, 3);
        assert_eq!(report.failed, 0);

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 2, "one remote call per (session, class) group");
        assert_eq!(calls[0], ("sess-a".into(), "c1".into(), 2));
        assert_eq!(calls[1], ("sess-b".into(), "c2".into(), 1));
        drop(calls);

        assert!(queue.pending_attendance().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_group_is_retained_for_retry() {
        let service = MockService::default();
        service.fail_classes.lock().unwrap().insert("c2".into());
        let (engine, queue, _api) = engine_with(service, true).await;

        queue.enqueue_attendance(intent("s1", "sess-a", "c1")).await.unwrap();
        queue.enqueue_attendance(intent("s2", "sess-b", "c2")).await.unwrap();
        queue.enqueue_attendance(intent("s3", "sess-b", "c2")).await.unwrap();

        let report = engine.drain().await;
        assert_eq!(report.submitted, 1);
        assert_eq!(report.failed, 2);

        let pending = queue.pending_attendance().await.unwrap();
        let students: Vec<_> = pending.iter().map(|i| i.student_id.as_str()).collect();
        assert_eq!(students, ["s2", "s3"]);
    }

    #[tokio::test]
    async fn test_per_record_rejection_stays_pending() {
        let service = MockService::default();
        service.reject_students.lock().unwrap().insert("bad".into());
        let (engine, queue, _api) = engine_with(service, true).await;

        queue.enqueue_attendance(intent("ok", "sess", "c1")).await.unwrap();
        queue.enqueue_attendance(intent("bad", "sess", "c1")).await.unwrap();

        let report = engine.drain().await;
        assert_eq!(report.submitted, 1);
        assert_eq!(report.failed, 1);

        let pending = queue.pending_attendance().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].student_id, "bad");
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_noop() {
        let gate = Arc::new(Notify::new());
        let service = MockService {
            gate: Some(gate.clone()),
            ..MockService::default()
        };
        let (engine, queue, api) = engine_with(service, true).await;
        queue.enqueue_attendance(intent("s1", "sess", "c1")).await.unwrap();

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.drain().await }
        });

        // Let the first drain reach the gated remote call.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = engine.drain().await;
        assert_eq!(second, DrainReport::default(), "second drain must no-op");

        gate.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.submitted, 1);
        assert_eq!(api.calls.lock().unwrap().len(), 1, "no duplicate remote call");
    }

    #[tokio::test]
    async fn test_duplicate_results_count_as_submitted() {
        // Simulate the retry-after-timeout case: the server already has the
        // records and answers `duplicate` for each.
        struct DuplicateService;
        impl AttendanceService for DuplicateService {
            async fn start_session(&self, _: &str) -> Result<SessionInfo, ApiError> {
                unimplemented!()
            }
            async fn mark_attendance(
                &self,
                _: &str,
                _: &str,
                marks: Vec<StudentMark>,
            ) -> Result<MarkResponse, ApiError> {
                Ok(MarkResponse {
                    success: true,
                    results: marks
                        .iter()
                        .map(|m| MarkResult {
                            student_id: m.student_id.clone(),
                            status: MarkStatus::Duplicate,
                            error: None,
                        })
                        .collect(),
                })
            }
            async fn end_session(&self, _: &str) -> Result<(), ApiError> {
                Ok(())
            }
            async fn fetch_roster(&self, _: &str) -> Result<Vec<Enrollment>, ApiError> {
                Ok(Vec::new())
            }
            async fn enroll_student(&self, _: EnrollRequest) -> Result<(), ApiError> {
                Ok(())
            }
        }

        let queue = OfflineQueue::open_in_memory().await.unwrap();
        queue.enqueue_attendance(intent("s1", "sess", "c1")).await.unwrap();
        let engine = SyncEngine::new(
            queue.clone(),
            Arc::new(DuplicateService),
            Arc::new(Connectivity::new(true)),
            Duration::from_secs(30),
            chrono::Duration::days(7),
        );

        let report = engine.drain().await;
        assert_eq!(report.submitted, 1);
        assert_eq!(report.failed, 0);
        assert!(queue.pending_attendance().await.unwrap().is_empty());
    }
}
