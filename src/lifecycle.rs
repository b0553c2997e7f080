use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use http::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::error::{Error, TransportErrorKind};
use crate::observe::RequestListener;
use crate::request::{RequestId, RequestSpec};
use crate::response::{Response, StatusClass};
use crate::util::{lock_unpoisoned, redact_url_for_logs, truncate_body};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    #[default]
    Idle,
    Loading,
    Complete,
    Failed,
}

impl RequestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Loading)
                | (Self::Loading, Self::Complete)
                | (Self::Loading, Self::Failed)
                | (Self::Failed, Self::Idle)
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub transferred: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total.filter(|total| *total > 0)?;
        Some((self.transferred as f64 / total as f64).min(1.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Default)]
struct RequestState {
    status: RequestStatus,
    response: Option<Response>,
    error: Option<Arc<Error>>,
    retry_count: u32,
    upload: Progress,
    download: Progress,
    cancelled: bool,
    retry_pending: bool,
    current_retry_interval: Option<Duration>,
    listener: Option<Arc<dyn RequestListener>>,
}

struct RequestInner {
    spec: RequestSpec,
    state: Mutex<RequestState>,
    finished: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    pub(crate) fn new(spec: RequestSpec) -> Self {
        let (finished, _) = watch::channel(false);
        let state = RequestState {
            listener: spec.listener(),
            ..RequestState::default()
        };
        Self {
            inner: Arc::new(RequestInner {
                spec,
                state: Mutex::new(state),
                finished,
            }),
        }
    }

    pub fn id(&self) -> RequestId {
        self.inner.spec.id()
    }

    pub fn spec(&self) -> &RequestSpec {
        &self.inner.spec
    }

    pub fn created_at(&self) -> SystemTime {
        self.inner.spec.created_at()
    }

    pub fn status(&self) -> RequestStatus {
        lock_unpoisoned(&self.inner.state).status
    }

    pub fn response(&self) -> Option<Response> {
        lock_unpoisoned(&self.inner.state).response.clone()
    }

    pub fn error(&self) -> Option<Arc<Error>> {
        lock_unpoisoned(&self.inner.state).error.clone()
    }

    pub fn retry_count(&self) -> u32 {
        lock_unpoisoned(&self.inner.state).retry_count
    }

    pub fn upload_progress(&self) -> Progress {
        lock_unpoisoned(&self.inner.state).upload
    }

    pub fn download_progress(&self) -> Progress {
        lock_unpoisoned(&self.inner.state).download
    }

    pub fn upload_percent_complete(&self) -> Option<f64> {
        self.upload_progress()
            .fraction()
            .map(|fraction| fraction * 100.0)
    }

    pub fn download_percent_complete(&self) -> Option<f64> {
        self.download_progress()
            .fraction()
            .map(|fraction| fraction * 100.0)
    }

    pub fn is_cancelled(&self) -> bool {
        lock_unpoisoned(&self.inner.state).cancelled
    }

    pub fn is_retry_pending(&self) -> bool {
        lock_unpoisoned(&self.inner.state).retry_pending
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow()
    }

    pub fn current_retry_interval(&self) -> Option<Duration> {
        lock_unpoisoned(&self.inner.state).current_retry_interval
    }

    pub fn response_status_code(&self) -> Option<StatusCode> {
        lock_unpoisoned(&self.inner.state)
            .response
            .as_ref()
            .map(Response::status)
    }

    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_status(self.response_status_code())
    }

    pub fn response_status_code_is_error(&self) -> bool {
        self.status_class().is_error()
    }

    pub fn response_status_code_is_retryable(&self) -> bool {
        self.status_class().is_retryable()
    }

    pub fn is_retryable(&self) -> bool {
        let policy = self.inner.spec.retry_policy();
        let state = lock_unpoisoned(&self.inner.state);
        let outcome_retryable = match (&state.error, &state.response) {
            (Some(error), _) => error.is_retryable(),
            (None, Some(response)) => response.status_class().is_retryable(),
            (None, None) => false,
        };
        outcome_retryable
            && policy.is_enabled()
            && state.retry_count < policy.configured_max_retries()
            && self.inner.spec.is_replayable()
    }

    pub fn response_mime_type(&self) -> Option<String> {
        lock_unpoisoned(&self.inner.state)
            .response
            .as_ref()
            .and_then(Response::mime_type)
    }

    pub fn response_string(&self) -> Option<String> {
        lock_unpoisoned(&self.inner.state)
            .response
            .as_ref()
            .map(Response::text_lossy)
    }

    pub fn response_json<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let response = self.response().ok_or(Error::NoResponse)?;
        response.json().map_err(|source| Error::DecodeResponse {
            source,
            body: truncate_body(response.body()),
        })
    }

    pub fn response_url_encoded(&self) -> BTreeMap<String, String> {
        self.response()
            .map(|response| response.url_encoded())
            .unwrap_or_default()
    }

    pub fn response_oauth_token(&self) -> Option<String> {
        self.response_url_encoded().remove("oauth_token")
    }

    pub fn response_oauth_token_secret(&self) -> Option<String> {
        self.response_url_encoded().remove("oauth_token_secret")
    }

    pub async fn wait(&self) -> RequestStatus {
        let mut finished = self.inner.finished.subscribe();
        let _ = finished.wait_for(|finished| *finished).await;
        self.status()
    }

    fn transition(state: &mut RequestState, to: RequestStatus) -> Result<(), Error> {
        if !state.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: state.status,
                to,
            });
        }
        state.status = to;
        Ok(())
    }

    pub(crate) fn begin_loading(&self) -> Result<(), Error> {
        let mut state = lock_unpoisoned(&self.inner.state);
        Self::transition(&mut state, RequestStatus::Loading)?;
        state.retry_pending = false;
        state.upload = Progress::default();
        state.download = Progress::default();
        Ok(())
    }

    pub(crate) fn complete(&self, response: Response) -> Result<(), Error> {
        let mut state = lock_unpoisoned(&self.inner.state);
        Self::transition(&mut state, RequestStatus::Complete)?;
        state.response = Some(response);
        state.error = None;
        Ok(())
    }

    pub(crate) fn fail(&self, error: Error, response: Option<Response>) -> Result<(), Error> {
        let mut state = lock_unpoisoned(&self.inner.state);
        Self::transition(&mut state, RequestStatus::Failed)?;
        state.error = Some(Arc::new(error));
        state.response = response;
        Ok(())
    }

    pub(crate) fn reset_for_retry(&self, interval: Duration) -> Result<(), Error> {
        let mut state = lock_unpoisoned(&self.inner.state);
        Self::transition(&mut state, RequestStatus::Idle)?;
        state.retry_count = state.retry_count.saturating_add(1);
        state.response = None;
        state.error = None;
        state.retry_pending = true;
        state.current_retry_interval = Some(interval);
        Ok(())
    }

    pub(crate) fn clear_retry_pending(&self) {
        lock_unpoisoned(&self.inner.state).retry_pending = false;
    }

    pub(crate) fn record_progress(
        &self,
        direction: TransferDirection,
        progress: Progress,
    ) -> Option<Progress> {
        let mut state = lock_unpoisoned(&self.inner.state);
        if state.status != RequestStatus::Loading {
            return None;
        }
        let slot = match direction {
            TransferDirection::Upload => &mut state.upload,
            TransferDirection::Download => &mut state.download,
        };
        if progress.transferred < slot.transferred {
            return None;
        }
        *slot = progress;
        Some(progress)
    }

    pub(crate) fn cancel(&self) {
        let mut state = lock_unpoisoned(&self.inner.state);
        state.cancelled = true;
        state.retry_pending = false;
        if state.status == RequestStatus::Loading {
            state.status = RequestStatus::Failed;
            state.error = Some(Arc::new(Error::Transport {
                kind: TransportErrorKind::Cancelled,
                method: self.inner.spec.method().clone(),
                url: redact_url_for_logs(&self.inner.spec.url().unwrap_or_default()),
                message: "request cancelled".to_owned(),
            }));
        }
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        lock_unpoisoned(&self.inner.state).listener.clone()
    }

    pub(crate) fn unregister_listener(&self) -> Option<Arc<dyn RequestListener>> {
        lock_unpoisoned(&self.inner.state).listener.take()
    }

    pub(crate) fn mark_finished(&self) {
        self.inner.finished.send_replace(true);
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Request {}

impl std::fmt::Debug for Request {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_unpoisoned(&self.inner.state);
        formatter
            .debug_struct("Request")
            .field("id", &self.inner.spec.id())
            .field("method", self.inner.spec.method())
            .field("command", &self.inner.spec.command())
            .field("status", &state.status)
            .field("retry_count", &state.retry_count)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};

    use super::{Progress, Request, RequestStatus, TransferDirection};
    use crate::error::{Error, ErrorCode};
    use crate::request::RequestSpec;
    use crate::response::{Response, StatusClass};
    use crate::retry::RetryPolicy;

    fn request() -> Request {
        Request::new(RequestSpec::new("https://api.example.com"))
    }

    fn response(status: u16, body: &'static [u8]) -> Response {
        Response::new(
            StatusCode::from_u16(status).expect("valid status"),
            HeaderMap::new(),
            Bytes::from_static(body),
        )
    }

    #[test]
    fn legal_transitions_follow_the_state_machine() {
        use RequestStatus::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Complete));
        assert!(Loading.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Idle));
        assert!(!Complete.can_transition_to(Loading));
        assert!(!Loading.can_transition_to(Loading));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let request = request();
        let error = request
            .complete(response(200, b""))
            .expect_err("idle cannot complete");
        assert_eq!(error.code(), ErrorCode::InvalidTransition);
        assert_eq!(request.status(), RequestStatus::Idle);
    }

    #[test]
    fn retry_reset_clears_outcome_and_counts_attempt() {
        let request = request();
        request.begin_loading().expect("idle to loading");
        request
            .fail(
                Error::HttpStatus {
                    status: 503,
                    method: Method::GET,
                    url: "https://api.example.com".to_owned(),
                    body: String::new(),
                },
                Some(response(503, b"busy")),
            )
            .expect("loading to failed");
        assert_eq!(request.status_class(), StatusClass::ServerError);

        request
            .reset_for_retry(Duration::from_secs(2))
            .expect("failed to idle");
        assert_eq!(request.status(), RequestStatus::Idle);
        assert_eq!(request.retry_count(), 1);
        assert!(request.response().is_none());
        assert!(request.error().is_none());
        assert!(request.is_retry_pending());
        assert_eq!(request.current_retry_interval(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn progress_is_monotonic_while_loading() {
        let request = request();
        let progress = |transferred| Progress {
            transferred,
            total: Some(100),
        };
        assert!(
            request
                .record_progress(TransferDirection::Upload, progress(10))
                .is_none()
        );

        request.begin_loading().expect("idle to loading");
        assert!(
            request
                .record_progress(TransferDirection::Download, progress(40))
                .is_some()
        );
        assert!(
            request
                .record_progress(TransferDirection::Download, progress(20))
                .is_none()
        );
        assert_eq!(request.download_progress().transferred, 40);
        assert_eq!(request.download_percent_complete(), Some(40.0));
        assert_eq!(request.upload_progress(), Progress::default());
    }

    #[test]
    fn response_helpers_parse_body() {
        let request = request();
        request.begin_loading().expect("idle to loading");
        request
            .complete(response(
                200,
                b"oauth_token=tok&oauth_token_secret=sec",
            ))
            .expect("loading to complete");

        assert_eq!(request.response_oauth_token().as_deref(), Some("tok"));
        assert_eq!(request.response_oauth_token_secret().as_deref(), Some("sec"));
        assert!(!request.response_status_code_is_error());
        let error = request
            .response_json::<serde_json::Value>()
            .expect_err("form body is not json");
        assert_eq!(error.code(), ErrorCode::DecodeResponse);
    }

    #[test]
    fn is_retryable_respects_policy_budget() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_retry_policy(RetryPolicy::fixed(Duration::from_secs(1), 1));
        let request = Request::new(spec);
        request.begin_loading().expect("idle to loading");
        request
            .fail(
                Error::HttpStatus {
                    status: 500,
                    method: Method::GET,
                    url: "https://api.example.com".to_owned(),
                    body: String::new(),
                },
                None,
            )
            .expect("loading to failed");
        assert!(request.is_retryable());

        request
            .reset_for_retry(Duration::from_secs(1))
            .expect("failed to idle");
        request.begin_loading().expect("idle to loading");
        request
            .fail(
                Error::HttpStatus {
                    status: 500,
                    method: Method::GET,
                    url: "https://api.example.com".to_owned(),
                    body: String::new(),
                },
                None,
            )
            .expect("loading to failed");
        assert!(!request.is_retryable());
    }

    #[test]
    fn cancelling_a_loading_request_fails_it() {
        let request = request();
        request.begin_loading().expect("idle to loading");
        request.cancel();
        assert!(request.is_cancelled());
        assert_eq!(request.status(), RequestStatus::Failed);
        assert_eq!(
            request.error().map(|error| error.code()),
            Some(ErrorCode::Transport)
        );
    }

    #[tokio::test]
    async fn wait_resolves_after_finish() {
        let request = request();
        let waiter = request.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        request.begin_loading().expect("idle to loading");
        request
            .complete(response(200, b"ok"))
            .expect("loading to complete");
        request.mark_finished();
        let status = handle.await.expect("wait task should join");
        assert_eq!(status, RequestStatus::Complete);
        assert!(request.is_finished());
    }
}
