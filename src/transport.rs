use std::time::Duration;

use futures_util::future::BoxFuture;
use http::{HeaderMap, Method};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::body::BodySource;
use crate::error::TransportErrorKind;
use crate::lifecycle::{Progress, TransferDirection};
use crate::request::RequestId;
use crate::response::Response;
use crate::tls::TrustEvaluator;
use crate::worker::Command;

#[derive(Debug)]
pub struct OutgoingCall {
    pub request_id: RequestId,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: BodySource,
    pub timeout: Duration,
    pub trust: TrustEvaluator,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NoNetwork, message)
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {} ms", timeout.as_millis()),
        )
    }
}

pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        call: OutgoingCall,
        progress: ProgressSink,
    ) -> BoxFuture<'static, Result<Response, TransportError>>;
}

#[derive(Clone)]
struct ProgressTarget {
    request_id: RequestId,
    attempt: u64,
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Clone, Default)]
pub struct ProgressSink {
    target: Option<ProgressTarget>,
}

impl ProgressSink {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn new(
        request_id: RequestId,
        attempt: u64,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            target: Some(ProgressTarget {
                request_id,
                attempt,
                commands,
            }),
        }
    }

    pub fn upload(&self, sent: u64, total: Option<u64>) {
        self.report(TransferDirection::Upload, sent, total);
    }

    pub fn download(&self, received: u64, total: Option<u64>) {
        self.report(TransferDirection::Download, received, total);
    }

    fn report(&self, direction: TransferDirection, transferred: u64, total: Option<u64>) {
        let Some(target) = &self.target else {
            return;
        };
        let _ = target.commands.send(Command::Progress {
            request_id: target.request_id,
            attempt: target.attempt,
            direction,
            progress: Progress { transferred, total },
        });
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProgressSink")
            .field(
                "request_id",
                &self.target.as_ref().map(|target| target.request_id),
            )
            .finish()
    }
}
