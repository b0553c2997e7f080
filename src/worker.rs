use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt as _;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn};

use crate::cache::{CachedResponse, ResponseCache};
use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::lifecycle::{Progress, Request, RequestStatus, TransferDirection};
use crate::metrics::QueueMetrics;
use crate::observe::QueueDelegate;
use crate::queue::RequestFilter;
use crate::request::{CachePolicy, RequestId, cache_key};
use crate::response::{Response, StatusClass};
use crate::retry::RetryAction;
use crate::transport::{ProgressSink, Transport};
use crate::util::{redact_url_for_logs, truncate_body};

type Perform = Box<dyn FnOnce(&QueueView<'_>) + Send>;

pub(crate) enum Command {
    Add(Request),
    SetProcessing(bool),
    SetActiveLimit(usize),
    Cancel {
        filter: RequestFilter,
        reply: Option<oneshot::Sender<usize>>,
    },
    CancelAll {
        resume: bool,
        reply: Option<oneshot::Sender<usize>>,
    },
    Started {
        request_id: RequestId,
        attempt: u64,
    },
    Progress {
        request_id: RequestId,
        attempt: u64,
        direction: TransferDirection,
        progress: Progress,
    },
    Completed {
        request_id: RequestId,
        attempt: u64,
        outcome: Result<Response, Error>,
    },
    RetryReady {
        request_id: RequestId,
    },
    Perform(Perform),
}

pub struct QueueView<'a> {
    name: &'a str,
    requests: &'a [Request],
    processing: bool,
    active_request_limit: usize,
}

impl QueueView<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn requests(&self) -> &[Request] {
        self.requests
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn active_request_limit(&self) -> usize {
        self.active_request_limit
    }

    pub fn active(&self) -> Vec<Request> {
        self.with_status(RequestStatus::Loading)
    }

    pub fn idle(&self) -> Vec<Request> {
        self.with_status(RequestStatus::Idle)
    }

    pub fn next_idle(&self) -> Option<Request> {
        self.requests
            .iter()
            .find(|request| is_dispatchable(request))
            .cloned()
    }

    pub fn backgroundable(&self) -> Vec<Request> {
        self.requests
            .iter()
            .filter(|request| request.spec().is_backgroundable())
            .cloned()
            .collect()
    }

    pub fn matching(&self, filter: &RequestFilter) -> Vec<Request> {
        self.requests
            .iter()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect()
    }

    fn with_status(&self, status: RequestStatus) -> Vec<Request> {
        self.requests
            .iter()
            .filter(|request| request.status() == status)
            .cloned()
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_owned()
}

fn is_dispatchable(request: &Request) -> bool {
    request.status() == RequestStatus::Idle && !request.is_retry_pending()
}

struct InFlight {
    attempt: u64,
    handle: JoinHandle<()>,
}

pub(crate) struct WorkerParts {
    pub(crate) name: Arc<str>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) delegate: Option<Arc<dyn QueueDelegate>>,
    pub(crate) cache: Option<Arc<dyn ResponseCache>>,
    pub(crate) credential_store: Option<Arc<dyn CredentialStore>>,
    pub(crate) metrics: QueueMetrics,
    pub(crate) processing: bool,
    pub(crate) active_request_limit: usize,
}

pub(crate) struct Worker {
    name: Arc<str>,
    commands: mpsc::WeakUnboundedSender<Command>,
    receiver: mpsc::UnboundedReceiver<Command>,
    transport: Arc<dyn Transport>,
    delegate: Option<Arc<dyn QueueDelegate>>,
    cache: Option<Arc<dyn ResponseCache>>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    metrics: QueueMetrics,
    processing: bool,
    active_request_limit: usize,
    requests: Vec<Request>,
    in_flight: HashMap<RequestId, InFlight>,
    retry_timers: HashMap<RequestId, JoinHandle<()>>,
    next_attempt: u64,
    busy: bool,
}

impl Worker {
    pub(crate) fn new(
        parts: WorkerParts,
        commands: &mpsc::UnboundedSender<Command>,
        receiver: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            name: parts.name,
            commands: commands.downgrade(),
            receiver,
            transport: parts.transport,
            delegate: parts.delegate,
            cache: parts.cache,
            credential_store: parts.credential_store,
            metrics: parts.metrics,
            processing: parts.processing,
            active_request_limit: parts.active_request_limit.max(1),
            requests: Vec::new(),
            in_flight: HashMap::new(),
            retry_timers: HashMap::new(),
            next_attempt: 1,
            busy: false,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            self.handle(command);
            self.pump();
            self.check_idle();
        }

        for (_, in_flight) in self.in_flight.drain() {
            in_flight.handle.abort();
        }
        for (_, timer) in self.retry_timers.drain() {
            timer.abort();
        }
        debug!(queue = %self.name, "request queue worker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add(request) => self.add(request),
            Command::SetProcessing(processing) => {
                debug!(queue = %self.name, processing, "queue processing toggled");
                self.processing = processing;
            }
            Command::SetActiveLimit(limit) => {
                self.active_request_limit = limit.max(1);
            }
            Command::Cancel { filter, reply } => {
                let cancelled = self.cancel_matching(|request| filter.matches(request));
                if let Some(reply) = reply {
                    let _ = reply.send(cancelled);
                }
            }
            Command::CancelAll { resume, reply } => {
                let cancelled = self.cancel_matching(|_| true);
                self.processing = resume;
                if let Some(reply) = reply {
                    let _ = reply.send(cancelled);
                }
            }
            Command::Started {
                request_id,
                attempt,
            } => self.started(request_id, attempt),
            Command::Progress {
                request_id,
                attempt,
                direction,
                progress,
            } => self.progress(request_id, attempt, direction, progress),
            Command::Completed {
                request_id,
                attempt,
                outcome,
            } => self.completed(request_id, attempt, outcome),
            Command::RetryReady { request_id } => {
                self.retry_timers.remove(&request_id);
                if let Some(request) = self.member(request_id) {
                    debug!(queue = %self.name, request_id = %request_id, "retry re-admitted");
                    request.clear_retry_pending();
                }
            }
            Command::Perform(perform) => {
                let view = QueueView {
                    name: self.name.as_ref(),
                    requests: &self.requests,
                    processing: self.processing,
                    active_request_limit: self.active_request_limit,
                };
                perform(&view);
            }
        }
    }

    fn add(&mut self, request: Request) {
        if self.member(request.id()).is_some() {
            warn!(queue = %self.name, request_id = %request.id(), "request already queued");
            return;
        }
        debug!(
            queue = %self.name,
            request_id = %request.id(),
            method = %request.spec().method(),
            command = request.spec().command(),
            "request added"
        );
        self.metrics.record_added();
        self.requests.push(request);
    }

    fn member(&self, request_id: RequestId) -> Option<Request> {
        self.requests
            .iter()
            .find(|request| request.id() == request_id)
            .cloned()
    }

    fn remove_member(&mut self, request_id: RequestId) {
        self.requests.retain(|request| request.id() != request_id);
    }

    fn pump(&mut self) {
        while self.processing && self.in_flight.len() < self.active_request_limit {
            let Some(next) = self.requests.iter().find(|request| is_dispatchable(request)).cloned()
            else {
                break;
            };
            self.dispatch(next);
        }
    }

    fn check_idle(&mut self) {
        let busy = !self.requests.is_empty();
        if self.busy && !busy {
            debug!(queue = %self.name, "request queue became idle");
            if let Some(delegate) = &self.delegate {
                delegate.did_become_idle(&self.name);
            }
        }
        self.busy = busy;
    }

    fn dispatch(&mut self, request: Request) {
        let request_id = request.id();
        if let Err(error) = request.begin_loading() {
            warn!(queue = %self.name, request_id = %request_id, error = %error, "dropping undispatchable request");
            self.remove_member(request_id);
            return;
        }

        let prepared = match request
            .spec()
            .prepare_call(self.credential_store.as_deref())
        {
            Ok(prepared) => prepared,
            Err(error) => {
                self.finalize_failure(&request, error, None);
                return;
            }
        };

        if let Some(listener) = request.listener() {
            listener.will_start(&request);
        }
        if let Some(delegate) = &self.delegate {
            delegate.will_start(&request);
        }

        if let Some(outcome) = self.cached_outcome(&request, &prepared.url) {
            debug!(queue = %self.name, request_id = %request_id, "request served from cache");
            self.finish_attempt(&request, outcome);
            return;
        }

        let Some(commands) = self.commands.upgrade() else {
            self.finalize_failure(&request, Error::QueueClosed, None);
            return;
        };
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let transport = Arc::clone(&self.transport);
        let method = prepared.method.clone();
        let url = redact_url_for_logs(&prepared.url);
        let span = info_span!(
            "reqq.request",
            queue = %self.name,
            request_id = %request_id,
            method = %method,
            attempt = request.retry_count() + 1
        );

        let exchange = {
            let commands = commands.clone();
            let method = method.clone();
            let url = url.clone();
            async move {
                let call = prepared.into_outgoing().await?;
                {
                    let _enter = span.enter();
                    debug!(url = %url, "sending request");
                }
                let _ = commands.send(Command::Started {
                    request_id,
                    attempt,
                });
                let progress = ProgressSink::new(request_id, attempt, commands.clone());
                transport
                    .execute(call, progress)
                    .await
                    .map_err(|error| Error::Transport {
                        kind: error.kind,
                        method,
                        url,
                        message: error.message,
                    })
            }
        };

        let handle = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(exchange).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(Error::TransportPanicked {
                    method,
                    url,
                    message: panic_message(&*panic),
                }),
            };
            let _ = commands.send(Command::Completed {
                request_id,
                attempt,
                outcome,
            });
        });

        self.metrics.record_started();
        self.in_flight.insert(request_id, InFlight { attempt, handle });
    }

    fn cached_outcome(&self, request: &Request, url: &str) -> Option<Result<Response, Error>> {
        let policy = request.spec().cache_policy();
        if policy == CachePolicy::Disabled {
            return None;
        }
        let key = cache_key(request.spec().method(), url);
        let hit = self.cache.as_ref().and_then(|cache| cache.lookup(&key));
        match (policy, hit) {
            (_, Some(entry)) => Some(Ok(Response::cached(entry))),
            (CachePolicy::CacheOnly, None) => Some(Err(Error::NoCachedData {
                url: redact_url_for_logs(url),
            })),
            _ => None,
        }
    }

    fn is_current_attempt(&self, request_id: RequestId, attempt: u64) -> bool {
        self.in_flight
            .get(&request_id)
            .is_some_and(|in_flight| in_flight.attempt == attempt)
    }

    fn started(&mut self, request_id: RequestId, attempt: u64) {
        if !self.is_current_attempt(request_id, attempt) {
            return;
        }
        let Some(request) = self.member(request_id) else {
            return;
        };
        if let Some(listener) = request.listener() {
            listener.did_start(&request);
        }
        if let Some(delegate) = &self.delegate {
            delegate.did_start(&request);
        }
    }

    fn progress(
        &mut self,
        request_id: RequestId,
        attempt: u64,
        direction: TransferDirection,
        progress: Progress,
    ) {
        if !self.is_current_attempt(request_id, attempt) {
            return;
        }
        let Some(request) = self.member(request_id) else {
            return;
        };
        let Some(progress) = request.record_progress(direction, progress) else {
            return;
        };
        if let Some(listener) = request.listener() {
            match direction {
                TransferDirection::Upload => listener.did_upload(&request, progress),
                TransferDirection::Download => listener.did_download(&request, progress),
            }
        }
    }

    fn completed(&mut self, request_id: RequestId, attempt: u64, outcome: Result<Response, Error>) {
        if !self.is_current_attempt(request_id, attempt) {
            debug!(queue = %self.name, request_id = %request_id, attempt, "dropping late result");
            self.metrics.record_late_result();
            return;
        }
        self.in_flight.remove(&request_id);
        self.metrics.record_attempt_ended();

        let Some(request) = self.member(request_id) else {
            self.metrics.record_late_result();
            return;
        };
        self.finish_attempt(&request, outcome);
    }

    fn finish_attempt(&mut self, request: &Request, outcome: Result<Response, Error>) {
        let spec = request.spec();
        let classified = match outcome {
            Ok(response) if response.status_class() == StatusClass::Success => {
                match spec.validator() {
                    Some(validator) => match validator.validate(request, &response) {
                        Ok(()) => Ok(response),
                        Err(message) => Err((Error::Validation { message }, Some(response))),
                    },
                    None => Ok(response),
                }
            }
            Ok(response) => {
                let error = Error::HttpStatus {
                    status: response.status().as_u16(),
                    method: spec.method().clone(),
                    url: redact_url_for_logs(spec.url().as_deref().unwrap_or_default()),
                    body: truncate_body(response.body()),
                };
                Err((error, Some(response)))
            }
            Err(error) => Err((error, None)),
        };

        match classified {
            Ok(response) => self.finalize_success(request, response),
            Err((error, response)) => self.handle_failure(request, error, response),
        }
    }

    fn handle_failure(&mut self, request: &Request, error: Error, response: Option<Response>) {
        let request_id = request.id();
        let policy = *request.spec().retry_policy();
        let retry_count = request.retry_count();
        let eligible = error.is_retryable() && request.spec().is_replayable();

        let final_error = match (eligible, policy.decide(retry_count, &error)) {
            (true, RetryAction::RetryAfter(delay)) => {
                let allowed = self
                    .delegate
                    .as_ref()
                    .is_none_or(|delegate| delegate.should_retry(request, &error));
                if allowed {
                    warn!(
                        queue = %self.name,
                        request_id = %request_id,
                        attempt = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "scheduling request retry"
                    );
                    if let Err(transition) = request
                        .fail(error, response)
                        .and_then(|()| request.reset_for_retry(delay))
                    {
                        warn!(queue = %self.name, request_id = %request_id, error = %transition, "retry reset failed");
                        return;
                    }
                    self.metrics.record_retry();
                    self.schedule_retry(request_id, delay);
                    return;
                }
                debug!(queue = %self.name, request_id = %request_id, "retry vetoed by delegate");
                self.metrics.record_retry_vetoed();
                Error::RetryExhausted {
                    retries: retry_count,
                    vetoed: true,
                    source: Box::new(error),
                }
            }
            (true, RetryAction::GiveUp) if policy.is_enabled() => Error::RetryExhausted {
                retries: retry_count,
                vetoed: false,
                source: Box::new(error),
            },
            _ => error,
        };

        self.finalize_failure(request, final_error, response);
    }

    fn schedule_retry(&mut self, request_id: RequestId, delay: Duration) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::RetryReady { request_id });
        });
        if let Some(previous) = self.retry_timers.insert(request_id, timer) {
            previous.abort();
        }
    }

    fn finalize_success(&mut self, request: &Request, response: Response) {
        let request_id = request.id();
        let from_cache = response.is_from_cache();
        let entry = CachedResponse::from_response(&response);
        if let Err(error) = request.complete(response) {
            warn!(queue = %self.name, request_id = %request_id, error = %error, "completion rejected");
            return;
        }
        self.remove_member(request_id);
        self.metrics.record_succeeded(from_cache);
        debug!(queue = %self.name, request_id = %request_id, from_cache, "request finished");

        let listener = request.listener();
        if let Some(listener) = &listener {
            listener.did_finish(request);
        }
        if !from_cache
            && request.spec().cache_policy() != CachePolicy::Disabled
            && let Some(cache) = &self.cache
            && let Ok(key) = request.spec().cache_key()
        {
            cache.store(&key, entry);
            if let Some(listener) = &listener {
                listener.did_write_to_cache(request);
            }
        }
        if let Some(delegate) = &self.delegate {
            delegate.did_finish(request);
        }
        request.unregister_listener();
        request.mark_finished();
    }

    fn finalize_failure(&mut self, request: &Request, error: Error, response: Option<Response>) {
        let request_id = request.id();
        debug!(queue = %self.name, request_id = %request_id, error = %error, "request failed");
        if let Err(transition) = request.fail(error, response) {
            warn!(queue = %self.name, request_id = %request_id, error = %transition, "failure rejected");
            return;
        }
        self.remove_member(request_id);
        self.metrics.record_failed();

        if let Some(listener) = request.listener()
            && let Some(error) = request.error()
        {
            if error.http_status() == Some(403) {
                listener.forbidden(request);
            }
            listener.did_fail(request, &error);
        }
        if let Some(delegate) = &self.delegate {
            delegate.did_finish(request);
        }
        request.unregister_listener();
        request.mark_finished();
    }

    fn cancel_matching(&mut self, matches: impl Fn(&Request) -> bool) -> usize {
        let (cancelled, kept): (Vec<_>, Vec<_>) = self
            .requests
            .drain(..)
            .partition(|request| matches(request));
        self.requests = kept;

        for request in &cancelled {
            let request_id = request.id();
            if let Some(in_flight) = self.in_flight.remove(&request_id) {
                in_flight.handle.abort();
                self.metrics.record_attempt_ended();
            }
            if let Some(timer) = self.retry_timers.remove(&request_id) {
                timer.abort();
            }
            request.cancel();
            request.unregister_listener();
            request.mark_finished();
            self.metrics.record_cancelled();
            debug!(queue = %self.name, request_id = %request_id, "request cancelled");
        }
        cancelled.len()
    }
}
