//! `reqq` is a concurrency-limited HTTP request queue for API SDKs.
//!
//! Requests are described with a [`RequestSpec`], admitted into a named [`RequestQueue`] and
//! dispatched in FIFO order while fewer than `active_request_limit` are loading. Each request
//! carries its own authentication (basic, token, OAuth 1.0a, bearer), retry backoff, TLS trust
//! mode and cache policy.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqq::prelude::{QueueProfile, RequestQueue, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Profile {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = RequestQueue::builder("api")
//!         .profile(QueueProfile::UnreliableNetwork)
//!         .base_url("https://api.example.com")
//!         .api_version("1.1")
//!         .oauth_consumer("consumer-key", "consumer-secret")
//!         .oauth_token("token", "token-secret")
//!         .retry_policy(RetryPolicy::fixed(Duration::from_secs(2), 3))
//!         .try_build()?;
//!
//!     let mut spec = queue.request_with_command("users/{id}.json");
//!     spec.set_path_parameter("id", "42")
//!         .set_authentication_type(reqq::AuthenticationType::OAuth1);
//!
//!     let request = queue.add_request(spec)?;
//!     request.wait().await;
//!
//!     let profile: Profile = request.response_json()?;
//!     println!("loaded id={}", profile.id);
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Use `QueueProfile::UnreliableNetwork` for mobile or flaky links.
//! - Streamed bodies are never retried; prefer buffers or files when retries matter.
//! - Keep `SslTrustMode::Unenforced` out of production builds.

mod auth;
mod body;
mod cache;
mod config;
mod credentials;
mod error;
#[cfg(feature = "transport-hyper")]
mod hyper_transport;
mod lifecycle;
mod metrics;
pub mod oauth;
mod observe;
mod queue;
mod request;
mod response;
mod retry;
mod tls;
mod transport;
mod util;
mod worker;

pub use crate::auth::{AuthSigner, AuthenticationType};
pub use crate::body::{
    BodyFormat, BodySource, BodyStream, FileAttachment, FileData, JSON_CONTENT_TYPE,
    MULTIPART_CONTENT_TYPE, OCTET_STREAM_CONTENT_TYPE, OutgoingBody, URL_ENCODED_CONTENT_TYPE,
};
pub use crate::cache::{CachedResponse, DEFAULT_CACHE_CAPACITY, MemoryCache, ResponseCache};
pub use crate::config::{DEFAULT_ACTIVE_REQUEST_LIMIT, ProfileDefaults, QueueDefaults, QueueProfile};
pub use crate::credentials::{
    BasicCredentials, CredentialStore, MemoryCredentialStore, OAuthCredentials,
};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
#[cfg(feature = "transport-hyper")]
pub use crate::hyper_transport::HyperTransport;
pub use crate::lifecycle::{Progress, Request, RequestStatus, TransferDirection};
pub use crate::metrics::QueueMetricsSnapshot;
pub use crate::oauth::{OAuth1Signature, OAuth1Signer, TokenResponse};
pub use crate::observe::{QueueDelegate, RequestCallbacks, RequestListener, ResponseValidator};
pub use crate::queue::{RequestFilter, RequestQueue, RequestQueueBuilder};
pub use crate::request::{CachePolicy, DEFAULT_REQUEST_TIMEOUT, RequestId, RequestSpec};
pub use crate::response::{Response, StatusClass};
pub use crate::retry::{RetryAction, RetryMethod, RetryPolicy};
pub use crate::tls::{SslTrustMode, TrustDecision, TrustEvaluator};
pub use crate::transport::{OutgoingCall, ProgressSink, Transport, TransportError};
pub use crate::util::percent_encode;
pub use crate::worker::QueueView;

pub type ReqqResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AuthenticationType, BodyFormat, CachePolicy, Error, ErrorCode, FileAttachment,
        QueueDelegate, QueueProfile, ReqqResult, Request, RequestCallbacks, RequestFilter,
        RequestListener, RequestQueue, RequestSpec, RequestStatus, Response, RetryPolicy,
        SslTrustMode, StatusClass,
    };
}

#[cfg(test)]
mod tests;
