#![cfg(feature = "transport-hyper")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;
use reqq::{
    BodyFormat, ErrorCode, Progress, Request, RequestCallbacks, RequestQueue, RequestStatus,
    TransportErrorKind,
};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct CannedResponse {
    status_line: &'static str,
    content_type: &'static str,
    body: String,
}

impl CannedResponse {
    fn ok_json(body: &str) -> Self {
        Self {
            status_line: "HTTP/1.1 200 OK",
            content_type: "application/json",
            body: body.to_owned(),
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).await.expect("read request");
        assert!(read > 0, "client closed before sending headers");
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        let read = stream.read(&mut chunk).await.expect("read body");
        assert!(read > 0, "client closed before sending body");
        buffer.extend_from_slice(&chunk[..read]);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

async fn spawn_server(responses: Vec<CannedResponse>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind server");
    let address = listener.local_addr().expect("local address");
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.expect("accept");
            seen.push(read_request(&mut stream).await);
            let payload = format!(
                "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response.status_line,
                response.content_type,
                response.body.len(),
                response.body
            );
            stream
                .write_all(payload.as_bytes())
                .await
                .expect("write response");
            let _ = stream.shutdown().await;
        }
        seen
    });
    (format!("http://{address}"), handle)
}

#[derive(Debug, Deserialize)]
struct Account {
    id: u64,
    name: String,
}

#[tokio::test]
async fn signed_request_round_trips_over_http() {
    let (base_url, server) =
        spawn_server(vec![CannedResponse::ok_json(r#"{"id":42,"name":"alice"}"#)]).await;
    let queue = RequestQueue::builder("http")
        .base_url(base_url)
        .api_version("1.1")
        .user_agent("reqq-tests/1")
        .oauth_consumer("ck", "cs")
        .oauth_token("tok", "ts")
        .build();

    let mut spec = queue.request_with_command("accounts/{id}.json");
    spec.set_path_parameter("id", "42")
        .set_authentication_type(reqq::AuthenticationType::OAuth1)
        .set_query_parameter("include", "profile");
    let request = queue.add_request(spec).expect("queue accepts request");
    assert_eq!(request.wait().await, RequestStatus::Complete);

    let account: Account = request.response_json().expect("json body");
    assert_eq!(account.id, 42);
    assert_eq!(account.name, "alice");
    assert_eq!(request.response_mime_type().as_deref(), Some("application/json"));

    let seen = server.await.expect("server task");
    let raw = &seen[0];
    assert!(raw.starts_with("GET /1.1/accounts/42.json?include=profile HTTP/1.1\r\n"));
    let lower = raw.to_ascii_lowercase();
    assert!(lower.contains("user-agent: reqq-tests/1"));
    assert!(lower.contains("authorization: oauth "));
    assert!(raw.contains("oauth_consumer_key=\"ck\""));
    assert!(raw.contains("oauth_token=\"tok\""));
    assert!(raw.contains("oauth_signature_method=\"HMAC-SHA1\""));
}

#[tokio::test]
async fn form_body_upload_reports_progress() {
    let (base_url, server) = spawn_server(vec![CannedResponse::ok_json("{}")]).await;
    let queue = RequestQueue::builder("http").base_url(base_url).build();

    let uploads: Arc<Mutex<Vec<Progress>>> = Arc::default();
    let downloads: Arc<Mutex<Vec<Progress>>> = Arc::default();
    let upload_sink = Arc::clone(&uploads);
    let download_sink = Arc::clone(&downloads);

    let mut spec = queue.request_with_command("statuses/update.json");
    spec.set_method(Method::POST)
        .set_body_format(BodyFormat::UrlEncoded)
        .set_body_parameter("status", "hello world")
        .set_callbacks(
            RequestCallbacks::new()
                .on_upload(move |_: &Request, progress| {
                    upload_sink.lock().expect("uploads lock").push(progress);
                })
                .on_download(move |_: &Request, progress| {
                    download_sink.lock().expect("downloads lock").push(progress);
                }),
        );
    let request = queue.add_request(spec).expect("queue accepts request");
    assert_eq!(request.wait().await, RequestStatus::Complete);

    let seen = server.await.expect("server task");
    assert!(seen[0].starts_with("POST /statuses/update.json HTTP/1.1\r\n"));
    assert!(
        seen[0]
            .to_ascii_lowercase()
            .contains("content-type: application/x-www-form-urlencoded")
    );
    assert!(seen[0].ends_with("status=hello%20world"));

    let uploads = uploads.lock().expect("uploads lock").clone();
    let last_upload = uploads.last().expect("upload progress reported");
    assert_eq!(last_upload.transferred, "status=hello%20world".len() as u64);
    assert_eq!(last_upload.total, Some(last_upload.transferred));
    assert_eq!(request.upload_percent_complete(), Some(100.0));

    let downloads = downloads.lock().expect("downloads lock").clone();
    assert_eq!(downloads.last().map(|progress| progress.transferred), Some(2));
}

#[tokio::test]
async fn refused_connection_is_reported_as_no_network() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local address");
    drop(listener);

    let queue = RequestQueue::builder("http")
        .base_url(format!("http://{address}"))
        .build();
    let request = queue
        .add_request(queue.request_with_command("ping"))
        .expect("queue accepts request");
    assert_eq!(request.wait().await, RequestStatus::Failed);

    let error = request.error().expect("failure recorded");
    assert_eq!(error.code(), ErrorCode::NoNetwork);
    assert_eq!(request.status_class(), reqq::StatusClass::NoNetwork);
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local address");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let queue = RequestQueue::builder("http")
        .base_url(format!("http://{address}"))
        .request_timeout(Duration::from_millis(100))
        .build();
    let request = queue
        .add_request(queue.request_with_command("slow"))
        .expect("queue accepts request");
    assert_eq!(request.wait().await, RequestStatus::Failed);

    let error = request.error().expect("failure recorded");
    assert_eq!(error.transport_kind(), Some(TransportErrorKind::Timeout));
    server.abort();
}
