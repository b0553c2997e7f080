use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use http::header::CONTENT_LENGTH;
use http::{HeaderValue, Request as HttpRequest, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::body::{BodySource, BodyStream};
use crate::error::TransportErrorKind;
use crate::response::Response;
use crate::tls::TrustEvaluator;
use crate::transport::{OutgoingCall, ProgressSink, Transport, TransportError};
use crate::util::lock_unpoisoned;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

type ReqBody = UnsyncBoxBody<Bytes, io::Error>;
type HyperClient = Client<HttpsConnector<HttpConnector>, ReqBody>;

#[derive(Clone, Default)]
pub struct HyperTransport {
    clients: Arc<Mutex<HashMap<String, HyperClient>>>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, trust: &TrustEvaluator) -> Result<HyperClient, TransportError> {
        let key = trust.cache_key();
        let mut clients = lock_unpoisoned(&self.clients);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let tls_config = trust
            .client_config()
            .map_err(|error| TransportError::new(TransportErrorKind::Trust, error.to_string()))?;
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        debug!(trust_mode = trust.mode().as_str(), "built pooled transport client");
        clients.insert(key, client.clone());
        Ok(client)
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("clients", &lock_unpoisoned(&self.clients).len())
            .finish()
    }
}

impl Transport for HyperTransport {
    fn execute(
        &self,
        call: OutgoingCall,
        progress: ProgressSink,
    ) -> BoxFuture<'static, Result<Response, TransportError>> {
        let client = self.client_for(&call.trust);
        Box::pin(async move {
            let client = client?;
            let timeout = call.timeout;
            match tokio::time::timeout(timeout, exchange(client, call, progress)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::timeout(timeout)),
            }
        })
    }
}

async fn exchange(
    client: HyperClient,
    call: OutgoingCall,
    progress: ProgressSink,
) -> Result<Response, TransportError> {
    let uri: Uri = call
        .url
        .parse()
        .map_err(|error: http::uri::InvalidUri| {
            TransportError::new(TransportErrorKind::Other, error.to_string())
        })?;
    let (body, length) = request_body(call.body, progress.clone()).await?;

    let mut builder = HttpRequest::builder().method(call.method).uri(uri);
    for (name, value) in &call.headers {
        builder = builder.header(name, value);
    }
    if let Some(length) = length
        && !call.headers.contains_key(CONTENT_LENGTH)
    {
        builder = builder.header(CONTENT_LENGTH, HeaderValue::from(length));
    }
    let request = builder
        .body(body)
        .map_err(|error| TransportError::new(TransportErrorKind::Other, error.to_string()))?;

    let response = client
        .request(request)
        .await
        .map_err(|error| TransportError::new(classify_client_error(&error), error.to_string()))?;
    let (parts, body) = response.into_parts();
    let total = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let body = read_body(body, total, &progress).await?;

    Ok(Response::new(parts.status, parts.headers, body))
}

async fn request_body(
    source: BodySource,
    progress: ProgressSink,
) -> Result<(ReqBody, Option<u64>), TransportError> {
    let (stream, total): (BodyStream, Option<u64>) = match source {
        BodySource::Empty => (Box::pin(stream::empty::<io::Result<Bytes>>()), Some(0)),
        BodySource::Bytes(bytes) => {
            let total = bytes.len() as u64;
            let chunks = chunk_bytes(bytes);
            (
                Box::pin(stream::iter(chunks.into_iter().map(Ok::<_, io::Error>))),
                Some(total),
            )
        }
        BodySource::File(path) => {
            let file = tokio::fs::File::open(&path).await.map_err(|error| {
                TransportError::new(
                    TransportErrorKind::Other,
                    format!("failed to open body file {}: {error}", path.display()),
                )
            })?;
            let total = file.metadata().await.ok().map(|metadata| metadata.len());
            (Box::pin(ReaderStream::new(file)), total)
        }
        BodySource::Stream(stream) => (stream, None),
    };

    let mut sent = 0_u64;
    let counted = stream.map(move |chunk| {
        let chunk = chunk?;
        sent = sent.saturating_add(chunk.len() as u64);
        progress.upload(sent, total);
        Ok(Frame::data(chunk))
    });
    Ok((BodyExt::boxed_unsync(StreamBody::new(counted)), total))
}

fn chunk_bytes(bytes: Bytes) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / UPLOAD_CHUNK_SIZE + 1);
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + UPLOAD_CHUNK_SIZE).min(bytes.len());
        chunks.push(bytes.slice(offset..end));
        offset = end;
    }
    chunks
}

async fn read_body(
    mut body: Incoming,
    total: Option<u64>,
    progress: &ProgressSink,
) -> Result<Bytes, TransportError> {
    let mut collected = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|error| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("failed to read response body: {error}"),
            )
        })?;
        if let Some(data) = frame.data_ref() {
            collected.extend_from_slice(data);
            progress.download(collected.len() as u64, total);
        }
    }
    Ok(Bytes::from(collected))
}

fn classify_client_error(error: &hyper_util::client::legacy::Error) -> TransportErrorKind {
    if !error.is_connect() {
        return TransportErrorKind::Other;
    }
    classify_connect_failure(&format!("{error:?}"))
}

fn classify_connect_failure(detail: &str) -> TransportErrorKind {
    let detail = detail.to_ascii_lowercase();
    if detail.contains("certificate") || detail.contains("tls") || detail.contains("handshake") {
        TransportErrorKind::Trust
    } else {
        TransportErrorKind::NoNetwork
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{UPLOAD_CHUNK_SIZE, chunk_bytes, classify_connect_failure};
    use crate::error::TransportErrorKind;

    #[test]
    fn large_buffers_upload_in_fixed_chunks() {
        let bytes = Bytes::from(vec![7_u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let chunks = chunk_bytes(bytes);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), UPLOAD_CHUNK_SIZE);
        assert_eq!(chunks[2].len(), 10);
        assert!(chunk_bytes(Bytes::new()).is_empty());
    }

    #[test]
    fn connect_failures_split_into_trust_and_network() {
        assert_eq!(
            classify_connect_failure("Custom { kind: InvalidData, error: InvalidCertificate(UnknownIssuer) }"),
            TransportErrorKind::Trust
        );
        assert_eq!(
            classify_connect_failure("ConnectError(\"tcp connect error\", Os { code: 111, kind: ConnectionRefused })"),
            TransportErrorKind::NoNetwork
        );
    }
}
