use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::auth::AuthenticationType;
use crate::cache::ResponseCache;
use crate::config::{DEFAULT_ACTIVE_REQUEST_LIMIT, QueueDefaults, QueueProfile};
use crate::credentials::{BasicCredentials, CredentialStore};
use crate::error::Error;
use crate::lifecycle::{Request, RequestStatus};
use crate::metrics::{QueueMetrics, QueueMetricsSnapshot};
use crate::oauth::{xauth_access_token_request, xauth_reverse_auth_request};
use crate::observe::QueueDelegate;
use crate::request::{RequestId, RequestSpec};
use crate::retry::RetryPolicy;
use crate::tls::SslTrustMode;
use crate::transport::Transport;
use crate::util::lock_unpoisoned;
use crate::worker::{Command, QueueView, Worker, WorkerParts};

type RequestPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum RequestFilter {
    Identifier(RequestId),
    Url(String),
    Command(String),
    Tag(String),
    CommandAndTag {
        command: String,
        tag: String,
    },
    Signature {
        command: String,
        method: Option<Method>,
        path_parameters: BTreeMap<String, String>,
        tag: Option<String>,
    },
    Status(RequestStatus),
    Predicate(RequestPredicate),
}

impl RequestFilter {
    pub fn predicate(predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    pub fn command_and_method(command: impl Into<String>, method: Method) -> Self {
        Self::Signature {
            command: command.into(),
            method: Some(method),
            path_parameters: BTreeMap::new(),
            tag: None,
        }
    }

    pub fn matches(&self, request: &Request) -> bool {
        let spec = request.spec();
        match self {
            Self::Identifier(id) => spec.id() == *id,
            Self::Url(url) => {
                spec.url().is_ok_and(|full| full == *url)
                    || spec.url_without_query().is_ok_and(|bare| bare == *url)
            }
            Self::Command(command) => spec.command() == command,
            Self::Tag(tag) => spec.tag() == Some(tag.as_str()),
            Self::CommandAndTag { command, tag } => {
                spec.command() == command && spec.tag() == Some(tag.as_str())
            }
            Self::Signature {
                command,
                method,
                path_parameters,
                tag,
            } => {
                spec.command() == command
                    && method.as_ref().is_none_or(|method| spec.method() == method)
                    && tag
                        .as_deref()
                        .is_none_or(|tag| spec.tag() == Some(tag))
                    && path_parameters
                        .iter()
                        .all(|(name, value)| spec.path_parameters().get(name) == Some(value))
            }
            Self::Status(status) => request.status() == *status,
            Self::Predicate(predicate) => predicate(request),
        }
    }
}

impl std::fmt::Debug for RequestFilter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier(id) => formatter.debug_tuple("Identifier").field(id).finish(),
            Self::Url(url) => formatter.debug_tuple("Url").field(url).finish(),
            Self::Command(command) => formatter.debug_tuple("Command").field(command).finish(),
            Self::Tag(tag) => formatter.debug_tuple("Tag").field(tag).finish(),
            Self::CommandAndTag { command, tag } => formatter
                .debug_struct("CommandAndTag")
                .field("command", command)
                .field("tag", tag)
                .finish(),
            Self::Signature {
                command,
                method,
                path_parameters,
                tag,
            } => formatter
                .debug_struct("Signature")
                .field("command", command)
                .field("method", method)
                .field("path_parameters", path_parameters)
                .field("tag", tag)
                .finish(),
            Self::Status(status) => formatter.debug_tuple("Status").field(status).finish(),
            Self::Predicate(_) => formatter.write_str("Predicate"),
        }
    }
}

struct QueueShared {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    defaults: Mutex<QueueDefaults>,
    processing: AtomicBool,
    active_request_limit: AtomicUsize,
    metrics: QueueMetrics,
}

#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<QueueShared>,
}

impl RequestQueue {
    pub fn builder(name: impl Into<String>) -> RequestQueueBuilder {
        RequestQueueBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| Error::QueueClosed)
    }

    pub fn defaults(&self) -> QueueDefaults {
        lock_unpoisoned(&self.shared.defaults).clone()
    }

    pub fn update_defaults(&self, update: impl FnOnce(&mut QueueDefaults)) {
        update(&mut lock_unpoisoned(&self.shared.defaults));
    }

    pub fn has_basic_auth_credentials(&self) -> bool {
        lock_unpoisoned(&self.shared.defaults).has_basic_auth_credentials()
    }

    pub fn has_oauth_credentials(&self) -> bool {
        lock_unpoisoned(&self.shared.defaults).has_oauth_credentials()
    }

    pub fn request_with_url(&self, url: &str) -> RequestSpec {
        let mut spec = RequestSpec::from_url(url);
        let mut defaults = self.defaults();
        defaults.base_url = spec.base_url().to_owned();
        defaults.api_version = None;
        defaults.apply_to(&mut spec);
        spec
    }

    pub fn request_with_command(&self, command: impl Into<String>) -> RequestSpec {
        let mut spec = RequestSpec::new("");
        lock_unpoisoned(&self.shared.defaults).apply_to(&mut spec);
        spec.set_command(command);
        spec
    }

    pub fn request_with_command_tag<K, I>(
        &self,
        command: impl Into<String>,
        tag: impl Into<String>,
        user_info: I,
    ) -> RequestSpec
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut spec = self.request_with_command(command);
        spec.set_tag(tag);
        for (name, value) in user_info {
            spec.set_user_info_value(name, value);
        }
        spec
    }

    pub fn xauth_access_token_request(
        &self,
        command: &str,
        username: &str,
        password: &str,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<RequestSpec, Error> {
        let endpoint = self.request_with_command(command).url()?;
        let mut spec = xauth_access_token_request(
            &endpoint,
            username,
            password,
            consumer_key,
            consumer_secret,
        );
        self.apply_transport_defaults(&mut spec);
        Ok(spec)
    }

    pub fn xauth_reverse_auth_request(
        &self,
        command: &str,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<RequestSpec, Error> {
        let endpoint = self.request_with_command(command).url()?;
        let mut spec = xauth_reverse_auth_request(&endpoint, consumer_key, consumer_secret);
        self.apply_transport_defaults(&mut spec);
        Ok(spec)
    }

    fn apply_transport_defaults(&self, spec: &mut RequestSpec) {
        let defaults = lock_unpoisoned(&self.shared.defaults);
        spec.set_ssl_trust_mode(defaults.ssl_trust_mode)
            .set_retry_policy(defaults.retry_policy);
        if let Some(user_agent) = &defaults.user_agent {
            spec.set_user_agent(user_agent.clone());
        }
        if let Some(timeout) = defaults.timeout {
            spec.set_timeout(timeout);
        }
        if let Some(path) = &defaults.pinned_certificate_path {
            spec.set_pinned_certificate_path(path.clone());
        }
    }

    pub fn add_request(&self, spec: RequestSpec) -> Result<Request, Error> {
        let request = Request::new(spec);
        self.send(Command::Add(request.clone()))?;
        Ok(request)
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::Acquire)
    }

    pub fn set_processing(&self, processing: bool) -> Result<(), Error> {
        self.shared.processing.store(processing, Ordering::Release);
        self.send(Command::SetProcessing(processing))
    }

    pub fn active_request_limit(&self) -> usize {
        self.shared.active_request_limit.load(Ordering::Acquire)
    }

    pub fn set_active_request_limit(&self, limit: usize) -> Result<(), Error> {
        let limit = limit.max(1);
        self.shared
            .active_request_limit
            .store(limit, Ordering::Release);
        self.send(Command::SetActiveLimit(limit))
    }

    pub async fn perform_and_wait<T, F>(&self, perform: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&QueueView<'_>) -> T + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Perform(Box::new(move |view: &QueueView<'_>| {
            let _ = reply.send(perform(view));
        })))?;
        receiver.await.map_err(|_| Error::QueueClosed)
    }

    pub async fn requests(&self) -> Result<Vec<Request>, Error> {
        self.perform_and_wait(|view| view.requests().to_vec()).await
    }

    pub async fn active_requests(&self) -> Result<Vec<Request>, Error> {
        self.perform_and_wait(|view| view.active()).await
    }

    pub async fn idle_requests(&self) -> Result<Vec<Request>, Error> {
        self.perform_and_wait(|view| view.idle()).await
    }

    pub async fn next_idle_request(&self) -> Result<Option<Request>, Error> {
        self.perform_and_wait(|view| view.next_idle()).await
    }

    pub async fn backgroundable_requests(&self) -> Result<Vec<Request>, Error> {
        self.perform_and_wait(|view| view.backgroundable()).await
    }

    pub async fn has_backgroundable_requests(&self) -> Result<bool, Error> {
        self.backgroundable_requests()
            .await
            .map(|requests| !requests.is_empty())
    }

    pub async fn find(&self, filter: RequestFilter) -> Result<Vec<Request>, Error> {
        self.perform_and_wait(move |view| view.matching(&filter))
            .await
    }

    pub async fn has_requests(&self, filter: RequestFilter) -> Result<bool, Error> {
        self.find(filter).await.map(|requests| !requests.is_empty())
    }

    pub async fn find_request(&self, id: RequestId) -> Result<Option<Request>, Error> {
        self.find(RequestFilter::Identifier(id))
            .await
            .map(|requests| requests.into_iter().next())
    }

    pub async fn has_request(&self, id: RequestId) -> Result<bool, Error> {
        self.has_requests(RequestFilter::Identifier(id)).await
    }

    pub async fn contains_request(&self, request: &Request) -> Result<bool, Error> {
        self.has_request(request.id()).await
    }

    pub async fn find_requests_for_url(&self, url: impl Into<String>) -> Result<Vec<Request>, Error> {
        self.find(RequestFilter::Url(url.into())).await
    }

    pub async fn find_requests_for_command(
        &self,
        command: impl Into<String>,
    ) -> Result<Vec<Request>, Error> {
        self.find(RequestFilter::Command(command.into())).await
    }

    pub async fn find_requests_for_tag(&self, tag: impl Into<String>) -> Result<Vec<Request>, Error> {
        self.find(RequestFilter::Tag(tag.into())).await
    }

    pub async fn find_requests_with_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<Request>, Error> {
        self.find(RequestFilter::Status(status)).await
    }

    pub async fn cancel(&self, filter: RequestFilter) -> Result<usize, Error> {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Cancel {
            filter,
            reply: Some(reply),
        })?;
        receiver.await.map_err(|_| Error::QueueClosed)
    }

    pub async fn cancel_request(&self, request: &Request) -> Result<bool, Error> {
        self.cancel(RequestFilter::Identifier(request.id()))
            .await
            .map(|cancelled| cancelled > 0)
    }

    pub async fn cancel_request_for_identifier(&self, id: RequestId) -> Result<bool, Error> {
        self.cancel(RequestFilter::Identifier(id))
            .await
            .map(|cancelled| cancelled > 0)
    }

    pub async fn cancel_requests_for_command(
        &self,
        command: impl Into<String>,
    ) -> Result<usize, Error> {
        self.cancel(RequestFilter::Command(command.into())).await
    }

    pub async fn cancel_requests_for_tag(&self, tag: impl Into<String>) -> Result<usize, Error> {
        self.cancel(RequestFilter::Tag(tag.into())).await
    }

    pub async fn cancel_requests_for_url(&self, url: impl Into<String>) -> Result<usize, Error> {
        self.cancel(RequestFilter::Url(url.into())).await
    }

    pub async fn cancel_requests_with_status(
        &self,
        status: RequestStatus,
    ) -> Result<usize, Error> {
        self.cancel(RequestFilter::Status(status)).await
    }

    pub async fn cancel_all_requests(&self) -> Result<usize, Error> {
        self.clear(false).await
    }

    pub async fn reset(&self) -> Result<usize, Error> {
        self.clear(true).await
    }

    async fn clear(&self, resume: bool) -> Result<usize, Error> {
        self.shared.processing.store(resume, Ordering::Release);
        let (reply, receiver) = oneshot::channel();
        self.send(Command::CancelAll {
            resume,
            reply: Some(reply),
        })?;
        receiver.await.map_err(|_| Error::QueueClosed)
    }

    pub fn metrics_snapshot(&self) -> QueueMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestQueue")
            .field("name", &self.shared.name)
            .field("processing", &self.is_processing())
            .field("active_request_limit", &self.active_request_limit())
            .finish()
    }
}

pub struct RequestQueueBuilder {
    name: String,
    defaults: QueueDefaults,
    active_request_limit: usize,
    processing: bool,
    transport: Option<Arc<dyn Transport>>,
    delegate: Option<Arc<dyn QueueDelegate>>,
    cache: Option<Arc<dyn ResponseCache>>,
    credential_store: Option<Arc<dyn CredentialStore>>,
}

impl RequestQueueBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: QueueDefaults::default(),
            active_request_limit: DEFAULT_ACTIVE_REQUEST_LIMIT,
            processing: true,
            transport: None,
            delegate: None,
            cache: None,
            credential_store: None,
        }
    }

    pub fn profile(mut self, profile: QueueProfile) -> Self {
        let defaults = profile.defaults();
        self.active_request_limit = defaults.active_request_limit;
        self.defaults.timeout = Some(defaults.request_timeout);
        self.defaults.retry_policy = defaults.retry_policy;
        self
    }

    pub fn defaults(mut self, defaults: QueueDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.defaults.base_url = base_url.into();
        self
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.defaults.api_version = Some(api_version.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.defaults.user_agent = Some(user_agent.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn authentication_type(mut self, authentication_type: AuthenticationType) -> Self {
        self.defaults.authentication_type = authentication_type;
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.defaults.basic = BasicCredentials::new(username, password);
        self.defaults.authentication_type = AuthenticationType::Basic;
        self
    }

    pub fn basic_auth_username(mut self, username: impl Into<String>) -> Self {
        self.defaults.basic = BasicCredentials {
            username: Some(username.into()),
            password: None,
        };
        self.defaults.authentication_type = AuthenticationType::Basic;
        self
    }

    pub fn oauth_consumer(
        mut self,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
    ) -> Self {
        self.defaults.oauth.consumer_key = Some(consumer_key.into());
        self.defaults.oauth.consumer_secret = Some(consumer_secret.into());
        self
    }

    pub fn oauth_token(mut self, token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        self.defaults.oauth.token = Some(token.into());
        self.defaults.oauth.token_secret = Some(token_secret.into());
        self
    }

    pub fn credential_service(mut self, service: impl Into<String>) -> Self {
        self.defaults.credential_service = Some(service.into());
        self
    }

    pub fn ssl_trust_mode(mut self, mode: SslTrustMode) -> Self {
        self.defaults.ssl_trust_mode = mode;
        self
    }

    pub fn pinned_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.defaults.pinned_certificate_path = Some(path.into());
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.defaults.retry_policy = retry_policy;
        self
    }

    pub fn active_request_limit(mut self, limit: usize) -> Self {
        self.active_request_limit = limit.max(1);
        self
    }

    pub fn processing(mut self, processing: bool) -> Self {
        self.processing = processing;
        self
    }

    pub fn transport(self, transport: impl Transport) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn delegate(mut self, delegate: Arc<dyn QueueDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    pub fn try_build(self) -> Result<RequestQueue, Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };

        let name: Arc<str> = Arc::from(self.name);
        let metrics = QueueMetrics::default();
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = Worker::new(
            WorkerParts {
                name: Arc::clone(&name),
                transport,
                delegate: self.delegate,
                cache: self.cache,
                credential_store: self.credential_store,
                metrics: metrics.clone(),
                processing: self.processing,
                active_request_limit: self.active_request_limit,
            },
            &commands,
            receiver,
        );
        runtime.spawn(worker.run());

        Ok(RequestQueue {
            shared: Arc::new(QueueShared {
                name,
                commands,
                defaults: Mutex::new(self.defaults),
                processing: AtomicBool::new(self.processing),
                active_request_limit: AtomicUsize::new(self.active_request_limit),
                metrics,
            }),
        })
    }

    #[track_caller]
    pub fn build(self) -> RequestQueue {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build reqq request queue: {error}"))
    }
}

#[cfg(feature = "transport-hyper")]
fn default_transport() -> Result<Arc<dyn Transport>, Error> {
    Ok(Arc::new(crate::hyper_transport::HyperTransport::new()))
}

#[cfg(not(feature = "transport-hyper"))]
fn default_transport() -> Result<Arc<dyn Transport>, Error> {
    Err(Error::MissingTransport)
}
