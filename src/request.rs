use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_core::Stream;
use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, Method};
use serde_json::Value;

use crate::auth::{AuthSigner, AuthenticationType};
use crate::body::{
    BodyFormat, BodySource, FileAttachment, JSON_CONTENT_TYPE, OutgoingBody, PendingBody, RawBody,
    URL_ENCODED_CONTENT_TYPE, encode_json, encode_url_encoded, generate_boundary,
};
use crate::credentials::{BasicCredentials, CredentialStore, OAuthCredentials};
use crate::error::Error;
use crate::observe::{RequestCallbacks, RequestListener, ResponseValidator};
use crate::oauth::XAUTH_MODE_CLIENT;
use crate::retry::RetryPolicy;
use crate::tls::{SslTrustMode, TrustEvaluator, require_pinned_path};
use crate::transport::OutgoingCall;
use crate::util::{
    encode_pairs, is_absolute_http_url, join_base_path, lock_unpoisoned, parse_header_name,
    parse_header_value, percent_encode, truncate_body,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "req-{}", self.0)
    }
}

pub(crate) fn cache_key(method: &Method, url: &str) -> String {
    format!("{method} {url}")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    #[default]
    Disabled,
    PreferCache,
    CacheOnly,
}

pub struct RequestSpec {
    id: RequestId,
    created_at: SystemTime,
    base_url: String,
    api_version: Option<String>,
    command: String,
    method: Method,
    headers: BTreeMap<String, String>,
    path_parameters: BTreeMap<String, String>,
    query_parameters: BTreeMap<String, String>,
    body_format: BodyFormat,
    body_parameters: BTreeMap<String, Value>,
    files: BTreeMap<String, FileAttachment>,
    raw_body: Option<RawBody>,
    multipart_boundary: Option<String>,
    user_agent: Option<String>,
    timeout: Duration,
    authentication_type: AuthenticationType,
    basic: BasicCredentials,
    auth_token: Option<String>,
    oauth: OAuthCredentials,
    oauth_callback_url: Option<String>,
    oauth_parameters: BTreeMap<String, String>,
    credential_service: Option<String>,
    ssl_trust_mode: SslTrustMode,
    pinned_certificate_path: Option<PathBuf>,
    retry_policy: RetryPolicy,
    cache_policy: CachePolicy,
    backgroundable: bool,
    tag: Option<String>,
    user_info: BTreeMap<String, Value>,
    listener: Option<Arc<dyn RequestListener>>,
    validator: Option<Arc<dyn ResponseValidator>>,
}

impl RequestSpec {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            created_at: SystemTime::now(),
            base_url: base_url.into(),
            api_version: None,
            command: String::new(),
            method: Method::GET,
            headers: BTreeMap::new(),
            path_parameters: BTreeMap::new(),
            query_parameters: BTreeMap::new(),
            body_format: BodyFormat::None,
            body_parameters: BTreeMap::new(),
            files: BTreeMap::new(),
            raw_body: None,
            multipart_boundary: None,
            user_agent: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            authentication_type: AuthenticationType::None,
            basic: BasicCredentials::default(),
            auth_token: None,
            oauth: OAuthCredentials::default(),
            oauth_callback_url: None,
            oauth_parameters: BTreeMap::new(),
            credential_service: None,
            ssl_trust_mode: SslTrustMode::default(),
            pinned_certificate_path: None,
            retry_policy: RetryPolicy::default(),
            cache_policy: CachePolicy::default(),
            backgroundable: false,
            tag: None,
            user_info: BTreeMap::new(),
            listener: None,
            validator: None,
        }
    }

    pub fn from_url(url: &str) -> Self {
        let Ok(mut parsed) = url::Url::parse(url) else {
            return Self::new(url);
        };
        let query = parsed
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect::<Vec<_>>();
        parsed.set_query(None);
        parsed.set_fragment(None);

        let mut spec = Self::new(parsed.as_str());
        spec.add_query_parameters(query);
        spec
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_api_version(&mut self, api_version: impl Into<String>) -> &mut Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    pub fn set_command(&mut self, command: impl Into<String>) -> &mut Self {
        self.command = command.into();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn add_headers<K, V, I>(&mut self, headers: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (name, value) in headers {
            self.set_header(name, value);
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn set_path_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.path_parameters.insert(name.into(), value.into());
        self
    }

    pub fn add_path_parameters<K, V, I>(&mut self, parameters: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.path_parameters.extend(
            parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn path_parameters(&self) -> &BTreeMap<String, String> {
        &self.path_parameters
    }

    pub fn set_query_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.query_parameters.insert(name.into(), value.into());
        self
    }

    pub fn add_query_parameters<K, V, I>(&mut self, parameters: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query_parameters.extend(
            parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn query_parameter(&self, name: &str) -> Option<&str> {
        self.query_parameters.get(name).map(String::as_str)
    }

    pub fn query_parameters(&self) -> &BTreeMap<String, String> {
        &self.query_parameters
    }

    pub fn set_body_format(&mut self, body_format: BodyFormat) -> &mut Self {
        self.body_format = body_format;
        self
    }

    pub fn body_format(&self) -> BodyFormat {
        self.body_format
    }

    pub fn set_body_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.body_parameters.insert(name.into(), value.into());
        self
    }

    pub fn add_body_parameters<K, V, I>(&mut self, parameters: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.body_parameters.extend(
            parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn body_parameter(&self, name: &str) -> Option<&Value> {
        self.body_parameters.get(name)
    }

    pub fn body_parameters(&self) -> &BTreeMap<String, Value> {
        &self.body_parameters
    }

    pub fn set_file(&mut self, name: impl Into<String>, file: FileAttachment) -> &mut Self {
        self.files.insert(name.into(), file);
        self
    }

    pub fn set_file_data(
        &mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> &mut Self {
        self.set_file(name, FileAttachment::from_bytes(filename, content_type, data))
    }

    pub fn set_file_path(
        &mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> &mut Self {
        self.set_file(name, FileAttachment::from_path(filename, content_type, path))
    }

    pub fn file(&self, name: &str) -> Option<&FileAttachment> {
        self.files.get(name)
    }

    pub fn files(&self) -> &BTreeMap<String, FileAttachment> {
        &self.files
    }

    pub fn set_raw_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.raw_body = Some(RawBody::Bytes(body.into()));
        self
    }

    pub fn set_raw_body_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.raw_body = Some(RawBody::File(path.into()));
        self
    }

    pub fn set_raw_body_stream<S>(&mut self, stream: S) -> &mut Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        self.raw_body = Some(RawBody::Stream(Mutex::new(Some(Box::pin(stream)))));
        self
    }

    pub fn clear_raw_body(&mut self) -> &mut Self {
        self.raw_body = None;
        self
    }

    pub fn has_raw_body(&self) -> bool {
        self.raw_body.is_some()
    }

    pub fn is_replayable(&self) -> bool {
        self.raw_body.as_ref().is_none_or(RawBody::is_replayable)
    }

    pub fn set_multipart_boundary(&mut self, boundary: impl Into<String>) -> &mut Self {
        self.multipart_boundary = Some(boundary.into());
        self
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) -> &mut Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_authentication_type(&mut self, authentication_type: AuthenticationType) -> &mut Self {
        self.authentication_type = authentication_type;
        self
    }

    pub fn authentication_type(&self) -> AuthenticationType {
        self.authentication_type
    }

    pub fn set_basic_auth(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> &mut Self {
        self.basic = BasicCredentials::new(username, password);
        self.authentication_type = AuthenticationType::Basic;
        self
    }

    pub fn set_basic_auth_username(&mut self, username: impl Into<String>) -> &mut Self {
        self.basic = BasicCredentials {
            username: Some(username.into()),
            password: None,
        };
        self.authentication_type = AuthenticationType::Basic;
        self
    }

    pub(crate) fn set_basic_credentials(&mut self, credentials: BasicCredentials) -> &mut Self {
        self.basic = credentials;
        self
    }

    pub fn basic_credentials(&self) -> &BasicCredentials {
        &self.basic
    }

    pub fn has_basic_auth_credentials(&self) -> bool {
        self.basic.username.is_some()
            && (self.basic.password.is_some() || self.credential_service.is_some())
    }

    pub fn set_auth_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.auth_token = Some(token.into());
        self.authentication_type = AuthenticationType::Token;
        self
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn set_oauth_credentials(&mut self, credentials: OAuthCredentials) -> &mut Self {
        self.oauth = credentials;
        self
    }

    pub fn set_oauth_consumer(
        &mut self,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
    ) -> &mut Self {
        self.oauth.consumer_key = Some(consumer_key.into());
        self.oauth.consumer_secret = Some(consumer_secret.into());
        self
    }

    pub fn set_oauth_token(
        &mut self,
        token: impl Into<String>,
        token_secret: impl Into<String>,
    ) -> &mut Self {
        self.oauth.token = Some(token.into());
        self.oauth.token_secret = Some(token_secret.into());
        self
    }

    pub fn oauth_credentials(&self) -> &OAuthCredentials {
        &self.oauth
    }

    pub fn has_oauth_credentials(&self) -> bool {
        self.oauth.has_consumer()
    }

    pub fn requires_oauth(&self) -> bool {
        self.authentication_type == AuthenticationType::OAuth1
    }

    pub fn set_oauth_callback_url(&mut self, callback_url: impl Into<String>) -> &mut Self {
        self.oauth_callback_url = Some(callback_url.into());
        self
    }

    pub fn oauth_callback_url(&self) -> Option<&str> {
        self.oauth_callback_url.as_deref()
    }

    pub fn set_oauth_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.oauth_parameters.insert(name.into(), value.into());
        self
    }

    pub fn add_oauth_parameters<K, V, I>(&mut self, parameters: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.oauth_parameters.extend(
            parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn oauth_parameter(&self, name: &str) -> Option<&str> {
        self.oauth_parameters.get(name).map(String::as_str)
    }

    pub fn oauth_parameters(&self) -> &BTreeMap<String, String> {
        &self.oauth_parameters
    }

    pub fn set_xauth_credentials(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> &mut Self {
        let username: String = username.into();
        let password: String = password.into();
        self.set_body_parameter("x_auth_mode", XAUTH_MODE_CLIENT)
            .set_body_parameter("x_auth_username", username)
            .set_body_parameter("x_auth_password", password)
    }

    pub fn set_credential_service(&mut self, service: impl Into<String>) -> &mut Self {
        self.credential_service = Some(service.into());
        self
    }

    pub fn credential_service(&self) -> Option<&str> {
        self.credential_service.as_deref()
    }

    pub fn set_ssl_trust_mode(&mut self, mode: SslTrustMode) -> &mut Self {
        self.ssl_trust_mode = mode;
        self
    }

    pub fn ssl_trust_mode(&self) -> SslTrustMode {
        self.ssl_trust_mode
    }

    pub fn set_pinned_certificate_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.pinned_certificate_path = Some(path.into());
        self
    }

    pub fn pinned_certificate_path(&self) -> Option<&Path> {
        self.pinned_certificate_path.as_deref()
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) -> &mut Self {
        self.retry_policy = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn set_cache_policy(&mut self, policy: CachePolicy) -> &mut Self {
        self.cache_policy = policy;
        self
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn set_backgroundable(&mut self, backgroundable: bool) -> &mut Self {
        self.backgroundable = backgroundable;
        self
    }

    pub fn is_backgroundable(&self) -> bool {
        self.backgroundable
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_user_info_value(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.user_info.insert(name.into(), value.into());
        self
    }

    pub fn user_info_value(&self, name: &str) -> Option<&Value> {
        self.user_info.get(name)
    }

    pub fn user_info(&self) -> &BTreeMap<String, Value> {
        &self.user_info
    }

    pub fn set_listener(&mut self, listener: Arc<dyn RequestListener>) -> &mut Self {
        self.listener = Some(listener);
        self
    }

    pub fn set_callbacks(&mut self, callbacks: RequestCallbacks) -> &mut Self {
        self.set_listener(Arc::new(callbacks))
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        self.listener.clone()
    }

    pub fn set_validator(&mut self, validator: Arc<dyn ResponseValidator>) -> &mut Self {
        self.validator = Some(validator);
        self
    }

    pub(crate) fn validator(&self) -> Option<Arc<dyn ResponseValidator>> {
        self.validator.clone()
    }

    pub fn resolved_command(&self) -> Result<String, Error> {
        let mut resolved = String::with_capacity(self.command.len());
        let mut rest = self.command.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            let key = &rest[open + 1..open + close];
            let value = self
                .path_parameters
                .get(key)
                .ok_or_else(|| Error::MissingPathParameter {
                    key: key.to_owned(),
                    command: self.command.clone(),
                })?;
            resolved.push_str(&rest[..open]);
            resolved.push_str(&percent_encode(value));
            rest = &rest[open + close + 1..];
        }
        resolved.push_str(rest);
        Ok(resolved)
    }

    pub fn query_string(&self) -> String {
        encode_pairs(
            self.query_parameters
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )
    }

    pub fn url_without_query(&self) -> Result<String, Error> {
        let command = self.resolved_command()?;
        let mut url = self.base_url.clone();
        if let Some(version) = &self.api_version {
            url = join_base_path(&url, version);
        }
        url = join_base_path(&url, &command);
        if !is_absolute_http_url(&url) {
            return Err(Error::InvalidUrl { url });
        }
        Ok(url)
    }

    pub fn url(&self) -> Result<String, Error> {
        let mut url = self.url_without_query()?;
        let query = self.query_string();
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }
        Ok(url)
    }

    pub fn cache_key(&self) -> Result<String, Error> {
        Ok(cache_key(&self.method, &self.url()?))
    }

    pub async fn body(&self) -> Result<OutgoingBody, Error> {
        self.pending_body()?.resolve().await
    }

    pub(crate) fn pending_body(&self) -> Result<PendingBody, Error> {
        if let Some(raw) = &self.raw_body {
            let source = match raw {
                RawBody::Bytes(bytes) => BodySource::Bytes(bytes.clone()),
                RawBody::File(path) => return Ok(PendingBody::File(path.clone())),
                RawBody::Stream(slot) => BodySource::Stream(
                    lock_unpoisoned(slot)
                        .take()
                        .ok_or(Error::BodyStreamConsumed)?,
                ),
            };
            return Ok(PendingBody::Ready(OutgoingBody {
                source,
                content_type: None,
            }));
        }

        match self.body_format {
            BodyFormat::None => Ok(PendingBody::Ready(OutgoingBody::empty())),
            BodyFormat::Json => Ok(PendingBody::Ready(OutgoingBody {
                source: BodySource::Bytes(encode_json(&self.body_parameters)?),
                content_type: Some(JSON_CONTENT_TYPE.to_owned()),
            })),
            BodyFormat::UrlEncoded => Ok(PendingBody::Ready(OutgoingBody {
                source: BodySource::Bytes(encode_url_encoded(&self.body_parameters)),
                content_type: Some(URL_ENCODED_CONTENT_TYPE.to_owned()),
            })),
            BodyFormat::Multipart => Ok(PendingBody::Multipart {
                boundary: self
                    .multipart_boundary
                    .clone()
                    .unwrap_or_else(generate_boundary),
                parameters: self.body_parameters.clone(),
                files: self.files.clone(),
            }),
        }
    }

    pub fn body_string_representation(&self) -> Option<String> {
        match &self.raw_body {
            Some(RawBody::Bytes(bytes)) => Some(truncate_body(bytes)),
            Some(raw @ (RawBody::File(_) | RawBody::Stream(_))) => {
                Some(format!("<{} body>", raw.kind()))
            }
            None if self.body_format == BodyFormat::Multipart => Some(format!(
                "<multipart body: {} parameters, {} files>",
                self.body_parameters.len(),
                self.files.len()
            )),
            None => {
                let PendingBody::Ready(body) = self.pending_body().ok()? else {
                    return None;
                };
                let bytes = body.source.as_bytes()?;
                (!bytes.is_empty()).then(|| truncate_body(bytes))
            }
        }
    }

    pub async fn outgoing_call(
        &self,
        credential_store: Option<&dyn CredentialStore>,
    ) -> Result<OutgoingCall, Error> {
        self.prepare_call(credential_store)?.into_outgoing().await
    }

    pub(crate) fn prepare_call(
        &self,
        credential_store: Option<&dyn CredentialStore>,
    ) -> Result<PreparedCall, Error> {
        let url = self.url()?;
        let authorization = AuthSigner::new(credential_store).authorization(self)?;
        if self.ssl_trust_mode == SslTrustMode::PinnedCertificatesOnly {
            require_pinned_path(self.pinned_certificate_path())?;
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.insert(parse_header_name(name)?, parse_header_value(name, value)?);
        }
        if let Some(user_agent) = &self.user_agent
            && !headers.contains_key(USER_AGENT)
        {
            headers.insert(USER_AGENT, parse_header_value("user-agent", user_agent)?);
        }
        if let Some(authorization) = authorization {
            headers.insert(
                AUTHORIZATION,
                parse_header_value("authorization", &authorization)?,
            );
        }

        Ok(PreparedCall {
            request_id: self.id,
            method: self.method.clone(),
            url,
            headers,
            body: self.pending_body()?,
            timeout: self.timeout,
            ssl_trust_mode: self.ssl_trust_mode,
            pinned_certificate_path: self.pinned_certificate_path.clone(),
        })
    }
}

pub(crate) struct PreparedCall {
    pub(crate) request_id: RequestId,
    pub(crate) method: Method,
    pub(crate) url: String,
    headers: HeaderMap,
    body: PendingBody,
    timeout: Duration,
    ssl_trust_mode: SslTrustMode,
    pinned_certificate_path: Option<PathBuf>,
}

impl PreparedCall {
    pub(crate) async fn into_outgoing(self) -> Result<OutgoingCall, Error> {
        let trust =
            TrustEvaluator::load(self.ssl_trust_mode, self.pinned_certificate_path.as_deref())
                .await?;
        let body = self.body.resolve().await?;

        let mut headers = self.headers;
        if let Some(content_type) = &body.content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(
                CONTENT_TYPE,
                parse_header_value("content-type", content_type)?,
            );
        }

        Ok(OutgoingCall {
            request_id: self.request_id,
            method: self.method,
            url: self.url,
            headers,
            body: body.source,
            timeout: self.timeout,
            trust,
        })
    }
}

impl std::fmt::Debug for RequestSpec {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestSpec")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("command", &self.command)
            .field("query_parameters", &self.query_parameters)
            .field("body_format", &self.body_format)
            .field("raw_body", &self.raw_body.as_ref().map(RawBody::kind))
            .field("authentication_type", &self.authentication_type)
            .field("basic", &self.basic)
            .field("oauth", &self.oauth)
            .field("ssl_trust_mode", &self.ssl_trust_mode)
            .field("retry_policy", &self.retry_policy)
            .field("cache_policy", &self.cache_policy)
            .field("backgroundable", &self.backgroundable)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;
    use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
    use serde_json::json;

    use super::{DEFAULT_REQUEST_TIMEOUT, RequestSpec};
    use crate::body::{BodyFormat, BodySource};
    use crate::error::ErrorCode;
    use crate::tls::SslTrustMode;

    #[test]
    fn identifiers_are_unique_and_increasing() {
        let first = RequestSpec::new("https://api.example.com");
        let second = RequestSpec::new("https://api.example.com");
        assert_ne!(first.id(), second.id());
        assert!(second.id() > first.id());
        assert!(first.id().to_string().starts_with("req-"));
    }

    #[test]
    fn url_joins_base_version_command_and_sorted_query() {
        let mut spec = RequestSpec::new("https://api.example.com/");
        spec.set_api_version("v2")
            .set_command("/users/{user_id}/posts")
            .set_path_parameter("user_id", "a b")
            .set_query_parameter("z", "last")
            .set_query_parameter("a", "first & only");

        assert_eq!(
            spec.url().expect("url should build"),
            "https://api.example.com/v2/users/a%20b/posts?a=first%20%26%20only&z=last"
        );
    }

    #[test]
    fn later_writes_overwrite_earlier_values() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_query_parameter("page", "1")
            .set_query_parameter("page", "2")
            .set_header("X-Trace", "one")
            .set_header("x-trace", "two");
        assert_eq!(spec.query_parameter("page"), Some("2"));
        assert_eq!(spec.header("X-TRACE"), Some("two"));
        assert_eq!(spec.headers().len(), 1);
    }

    #[test]
    fn missing_path_parameter_is_a_configuration_error() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_command("items/{id}");
        let error = spec.url().expect_err("placeholder without value");
        assert_eq!(error.code(), ErrorCode::MissingPathParameter);
        assert!(error.is_configuration());
    }

    #[test]
    fn relative_url_is_rejected() {
        let spec = RequestSpec::new("api.example.com");
        let error = spec.url().expect_err("scheme-less url should fail");
        assert_eq!(error.code(), ErrorCode::InvalidUrl);
    }

    #[test]
    fn from_url_moves_query_into_parameters() {
        let spec = RequestSpec::from_url("https://api.example.com/search?q=rust%20lang&page=3");
        assert_eq!(spec.base_url(), "https://api.example.com/search");
        assert_eq!(spec.query_parameter("q"), Some("rust lang"));
        assert_eq!(
            spec.url().expect("url should build"),
            "https://api.example.com/search?page=3&q=rust%20lang"
        );
    }

    #[tokio::test]
    async fn raw_buffer_takes_precedence_over_formatted_body() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_body_format(BodyFormat::Json)
            .set_body_parameter("name", "ignored")
            .set_raw_body(Bytes::from_static(b"raw payload"));

        let body = spec.body().await.expect("body should resolve");
        assert_eq!(
            body.source.as_bytes().map(|bytes| bytes.as_ref()),
            Some(&b"raw payload"[..])
        );
        assert_eq!(body.content_type, None);

        spec.clear_raw_body();
        let body = spec.body().await.expect("body should resolve");
        assert_eq!(body.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn streaming_body_is_handed_out_once() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_raw_body_stream(futures_util::stream::iter(vec![Ok::<_, std::io::Error>(
            Bytes::from_static(b"chunk"),
        )]));
        assert!(!spec.is_replayable());

        let first = spec.body().await.expect("first stream take");
        assert!(matches!(first.source, BodySource::Stream(_)));
        let error = spec.body().await.expect_err("second stream take should fail");
        assert_eq!(error.code(), ErrorCode::BodyStreamConsumed);
    }

    #[tokio::test]
    async fn multipart_body_uses_boundary_override() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_body_format(BodyFormat::Multipart)
            .set_multipart_boundary("fixed-boundary")
            .set_body_parameter("caption", "hi")
            .set_file_data("photo", "a.png", "image/png", Bytes::from_static(b"png"));

        let body = spec.body().await.expect("multipart should encode");
        assert_eq!(
            body.content_type.as_deref(),
            Some("multipart/form-data; boundary=fixed-boundary")
        );
        let text = String::from_utf8_lossy(body.source.as_bytes().expect("buffered body"))
            .into_owned();
        assert!(text.contains("filename=\"a.png\""));
    }

    #[tokio::test]
    async fn outgoing_call_carries_signed_headers_and_body() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_command("items")
            .set_method(Method::POST)
            .set_body_format(BodyFormat::UrlEncoded)
            .set_body_parameter("count", json!(2))
            .set_user_agent("reqq-test/1.0")
            .set_basic_auth("alice", "s3cret");

        let call = spec.outgoing_call(None).await.expect("call should build");
        assert_eq!(call.method, Method::POST);
        assert_eq!(call.url, "https://api.example.com/items");
        assert_eq!(call.timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            call.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Basic YWxpY2U6czNjcmV0")
        );
        assert_eq!(
            call.headers.get(USER_AGENT).and_then(|v| v.to_str().ok()),
            Some("reqq-test/1.0")
        );
        assert_eq!(
            call.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            call.body.as_bytes().map(|bytes| bytes.as_ref()),
            Some(&b"count=2"[..])
        );
    }

    #[test]
    fn body_string_representation_describes_payload() {
        let mut spec = RequestSpec::new("https://api.example.com");
        assert_eq!(spec.body_string_representation(), None);
        spec.set_body_format(BodyFormat::UrlEncoded)
            .set_body_parameter("q", "a b");
        assert_eq!(spec.body_string_representation().as_deref(), Some("q=a%20b"));
        spec.set_raw_body_file("/tmp/upload.bin");
        assert_eq!(
            spec.body_string_representation().as_deref(),
            Some("<file body>")
        );
    }

    #[test]
    fn preparing_a_call_fails_fast_on_configuration_errors() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_command("items/{id}");
        let error = spec.prepare_call(None).err().expect("missing path parameter");
        assert_eq!(error.code(), ErrorCode::MissingPathParameter);

        spec.set_path_parameter("id", "7")
            .set_ssl_trust_mode(SslTrustMode::PinnedCertificatesOnly);
        let error = spec.prepare_call(None).err().expect("pinned mode needs a path");
        assert_eq!(error.code(), ErrorCode::PinnedCertificate);

        spec.set_ssl_trust_mode(SslTrustMode::ValidCertificatesOnly)
            .set_raw_body_file("/nonexistent/reqq/upload.bin");
        assert!(spec.prepare_call(None).is_ok());
    }

    #[tokio::test]
    async fn unreadable_raw_body_file_is_a_configuration_error() {
        let mut spec = RequestSpec::new("https://api.example.com");
        spec.set_method(Method::POST)
            .set_raw_body_file("/nonexistent/reqq/upload.bin");
        let error = spec
            .outgoing_call(None)
            .await
            .expect_err("missing file should fail");
        assert_eq!(error.code(), ErrorCode::ReadBodyFile);
        assert!(error.is_configuration());
    }
}
