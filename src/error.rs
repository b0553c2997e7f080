use http::Method;
use thiserror::Error;

use crate::auth::AuthenticationType;
use crate::lifecycle::RequestStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    NoNetwork,
    Timeout,
    Trust,
    Cancelled,
    Other,
}

impl TransportErrorKind {
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::NoNetwork | Self::Timeout | Self::Other)
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoNetwork => "no_network",
            Self::Timeout => "timeout",
            Self::Trust => "trust",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    NoNetwork,
    NoCachedData,
    LoadedCachedData,
    MissingCredential,
    MissingPathParameter,
    InvalidUrl,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    ReadBodyFile,
    BodyStreamConsumed,
    PinnedCertificate,
    TlsConfig,
    Signature,
    Transport,
    TransportPanicked,
    HttpStatus,
    Validation,
    RetryExhausted,
    NoResponse,
    DecodeResponse,
    InvalidTransition,
    QueueClosed,
    NoRuntime,
    MissingTransport,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoNetwork => "no_network",
            Self::NoCachedData => "no_cached_data",
            Self::LoadedCachedData => "loaded_cached_data",
            Self::MissingCredential => "missing_credential",
            Self::MissingPathParameter => "missing_path_parameter",
            Self::InvalidUrl => "invalid_url",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::ReadBodyFile => "read_body_file",
            Self::BodyStreamConsumed => "body_stream_consumed",
            Self::PinnedCertificate => "pinned_certificate",
            Self::TlsConfig => "tls_config",
            Self::Signature => "signature",
            Self::Transport => "transport",
            Self::TransportPanicked => "transport_panicked",
            Self::HttpStatus => "http_status",
            Self::Validation => "validation",
            Self::RetryExhausted => "retry_exhausted",
            Self::NoResponse => "no_response",
            Self::DecodeResponse => "decode_response",
            Self::InvalidTransition => "invalid_transition",
            Self::QueueClosed => "queue_closed",
            Self::NoRuntime => "no_runtime",
            Self::MissingTransport => "missing_transport",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{auth} authentication requires {field}")]
    MissingCredential {
        auth: AuthenticationType,
        field: &'static str,
    },
    #[error("no value supplied for path parameter {{{key}}} in {command}")]
    MissingPathParameter { key: String, command: String },
    #[error("invalid request url: {url}")]
    InvalidUrl { url: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read request body file {path}: {source}")]
    ReadBodyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request body stream was already consumed by an earlier attempt")]
    BodyStreamConsumed,
    #[error("failed to load pinned certificate {path}: {message}")]
    PinnedCertificate { path: String, message: String },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    #[error("failed to sign request: {message}")]
    Signature { message: String },
    #[error("no cached data for {url}")]
    NoCachedData { url: String },
    #[error("http transport error ({kind}) for {method} {url}: {message}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        url: String,
        message: String,
    },
    #[error("http transport panicked during {method} {url}: {message}")]
    TransportPanicked {
        method: Method,
        url: String,
        message: String,
    },
    #[error("http status error {status} for {method} {url}: {body}")]
    HttpStatus {
        status: u16,
        method: Method,
        url: String,
        body: String,
    },
    #[error("response validation failed: {message}")]
    Validation { message: String },
    #[error("request failed after {retries} retries{}: {source}", vetoed_suffix(.vetoed))]
    RetryExhausted {
        retries: u32,
        vetoed: bool,
        #[source]
        source: Box<Error>,
    },
    #[error("request has no response")]
    NoResponse,
    #[error("failed to decode response json: {source}; body={body}")]
    DecodeResponse {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid request status transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("request queue worker has shut down")]
    QueueClosed,
    #[error("request queue requires a running tokio runtime")]
    NoRuntime,
    #[error("no transport configured; enable `transport-hyper` or call transport(...)")]
    MissingTransport,
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCredential { .. } => ErrorCode::MissingCredential,
            Self::MissingPathParameter { .. } => ErrorCode::MissingPathParameter,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::ReadBodyFile { .. } => ErrorCode::ReadBodyFile,
            Self::BodyStreamConsumed => ErrorCode::BodyStreamConsumed,
            Self::PinnedCertificate { .. } => ErrorCode::PinnedCertificate,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::Signature { .. } => ErrorCode::Signature,
            Self::NoCachedData { .. } => ErrorCode::NoCachedData,
            Self::Transport {
                kind: TransportErrorKind::NoNetwork,
                ..
            } => ErrorCode::NoNetwork,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::TransportPanicked { .. } => ErrorCode::TransportPanicked,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::Validation { .. } => ErrorCode::Validation,
            Self::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            Self::NoResponse => ErrorCode::NoResponse,
            Self::DecodeResponse { .. } => ErrorCode::DecodeResponse,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::QueueClosed => ErrorCode::QueueClosed,
            Self::NoRuntime => ErrorCode::NoRuntime,
            Self::MissingTransport => ErrorCode::MissingTransport,
        }
    }

    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential { .. }
                | Self::MissingPathParameter { .. }
                | Self::InvalidUrl { .. }
                | Self::InvalidHeaderName { .. }
                | Self::InvalidHeaderValue { .. }
                | Self::SerializeJson { .. }
                | Self::ReadBodyFile { .. }
                | Self::BodyStreamConsumed
                | Self::PinnedCertificate { .. }
                | Self::TlsConfig { .. }
                | Self::Signature { .. }
        )
    }

    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => kind.is_retryable(),
            Self::HttpStatus { status, .. } => *status >= 500 && *status <= 599,
            _ => false,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::RetryExhausted { source, .. } => source.http_status(),
            _ => None,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            Self::RetryExhausted { source, .. } => source.transport_kind(),
            _ => None,
        }
    }
}

fn vetoed_suffix(vetoed: &bool) -> &'static str {
    if *vetoed { " (retry vetoed)" } else { "" }
}
