use crate::types::{
    Ack, ApiError, EndSessionRequest, EnrollRequest, MarkRequest, MarkResponse, RosterResponse,
    SessionInfo, StartSessionRequest, StudentMark,
};
use rollcall_core::Enrollment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Remote attendance service operations consumed by the client pipeline.
///
/// Implemented by [`ApiClient`] against the real service and by scripted
/// mocks in tests of the session controller and sync engine.
#[allow(async_fn_in_trait)]
pub trait AttendanceService {
    async fn start_session(&self, class_id: &str) -> Result<SessionInfo, ApiError>;

    /// Submit a batch of marks for one session. The endpoint upserts on
    /// (studentId, classId, date, sessionId); resubmission yields
    /// per-record `duplicate` results, not errors.
    async fn mark_attendance(
        &self,
        session_id: &str,
        class_id: &str,
        marks: Vec<StudentMark>,
    ) -> Result<MarkResponse, ApiError>;

    async fn end_session(&self, session_id: &str) -> Result<(), ApiError>;

    /// Fetch the class roster with decrypted embeddings. Delivered once per
    /// session start and held only in session memory.
    async fn fetch_roster(&self, class_id: &str) -> Result<Vec<Enrollment>, ApiError>;

    async fn enroll_student(&self, request: EnrollRequest) -> Result<(), ApiError>;
}

/// HTTP client for the attendance backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Build a client with a bounded per-request timeout. A timed-out
    /// submit is indistinguishable from a network failure to callers.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        auth_token: Option<String>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let mut req = self.http.post(self.endpoint(path)).json(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        Self::decode(req.send().await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let mut req = self.http.get(self.endpoint(path));
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        Self::decode(req.send().await?).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }
}

impl AttendanceService for ApiClient {
    async fn start_session(&self, class_id: &str) -> Result<SessionInfo, ApiError> {
        let info: SessionInfo = self
            .post_json(
                "attendance/start-session",
                &StartSessionRequest {
                    class_id: class_id.to_string(),
                },
            )
            .await?;
        tracing::info!(session_id = %info.session_id, class_id, "session started");
        Ok(info)
    }

    async fn mark_attendance(
        &self,
        session_id: &str,
        class_id: &str,
        marks: Vec<StudentMark>,
    ) -> Result<MarkResponse, ApiError> {
        let count = marks.len();
        let resp: MarkResponse = self
            .post_json(
                "attendance/mark",
                &MarkRequest {
                    session_id: session_id.to_string(),
                    class_id: class_id.to_string(),
                    recognized_students: marks,
                },
            )
            .await?;
        tracing::debug!(session_id, count, accepted = resp.all_accepted(), "marks submitted");
        Ok(resp)
    }

    async fn end_session(&self, session_id: &str) -> Result<(), ApiError> {
        let _: Ack = self
            .post_json(
                "attendance/end-session",
                &EndSessionRequest {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        tracing::info!(session_id, "session ended");
        Ok(())
    }

    async fn fetch_roster(&self, class_id: &str) -> Result<Vec<Enrollment>, ApiError> {
        let resp: RosterResponse = self
            .get_json(&format!("students/embeddings/{class_id}"))
            .await?;
        tracing::info!(class_id, students = resp.students.len(), "roster fetched");
        Ok(resp.students.into_iter().map(Enrollment::from).collect())
    }

    async fn enroll_student(&self, request: EnrollRequest) -> Result<(), ApiError> {
        let roll_no = request.roll_no.clone();
        let _: Ack = self.post_json("students/enroll", &request).await?;
        tracing::info!(roll_no, "student enrolled");
        Ok(())
    }
}
