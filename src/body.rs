use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures_core::Stream;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::Value;

use crate::error::Error;
use crate::util::encode_pairs;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const URL_ENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyFormat {
    #[default]
    None,
    Multipart,
    Json,
    UrlEncoded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileData {
    Bytes(Bytes),
    Path(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: FileData,
}

impl FileAttachment {
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: FileData::Bytes(data.into()),
        }
    }

    pub fn from_path(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: FileData::Path(path.into()),
        }
    }

    async fn load(&self) -> Result<Bytes, Error> {
        match &self.data {
            FileData::Bytes(bytes) => Ok(bytes.clone()),
            FileData::Path(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|source| read_body_file_error(path, source)),
        }
    }
}

fn read_body_file_error(path: &Path, source: io::Error) -> Error {
    Error::ReadBodyFile {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) enum RawBody {
    Bytes(Bytes),
    File(PathBuf),
    Stream(std::sync::Mutex<Option<BodyStream>>),
}

impl RawBody {
    pub(crate) fn is_replayable(&self) -> bool {
        !matches!(self, Self::Stream(_))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::File(_) => "file",
            Self::Stream(_) => "stream",
        }
    }
}

pub enum BodySource {
    Empty,
    Bytes(Bytes),
    File(PathBuf),
    Stream(BodyStream),
}

impl BodySource {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::File(_) | Self::Stream(_) => false,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Bytes(bytes) => formatter
                .debug_tuple("Bytes")
                .field(&bytes.len())
                .finish(),
            Self::File(path) => formatter.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => formatter.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct OutgoingBody {
    pub source: BodySource,
    pub content_type: Option<String>,
}

impl OutgoingBody {
    pub(crate) fn empty() -> Self {
        Self {
            source: BodySource::Empty,
            content_type: None,
        }
    }
}

pub(crate) enum PendingBody {
    Ready(OutgoingBody),
    File(PathBuf),
    Multipart {
        boundary: String,
        parameters: BTreeMap<String, Value>,
        files: BTreeMap<String, FileAttachment>,
    },
}

impl PendingBody {
    pub(crate) async fn resolve(self) -> Result<OutgoingBody, Error> {
        match self {
            Self::Ready(body) => Ok(body),
            Self::File(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|source| read_body_file_error(&path, source))?;
                let metadata = file
                    .metadata()
                    .await
                    .map_err(|source| read_body_file_error(&path, source))?;
                if !metadata.is_file() {
                    return Err(read_body_file_error(
                        &path,
                        io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
                    ));
                }
                Ok(OutgoingBody {
                    source: BodySource::File(path),
                    content_type: None,
                })
            }
            Self::Multipart {
                boundary,
                parameters,
                files,
            } => {
                let body = encode_multipart(&boundary, &parameters, &files).await?;
                Ok(OutgoingBody {
                    source: BodySource::Bytes(body),
                    content_type: Some(format!("{MULTIPART_CONTENT_TYPE}; boundary={boundary}")),
                })
            }
        }
    }
}

pub(crate) fn parameter_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn encode_json(parameters: &BTreeMap<String, Value>) -> Result<Bytes, Error> {
    serde_json::to_vec(parameters)
        .map(Bytes::from)
        .map_err(|source| Error::SerializeJson { source })
}

pub(crate) fn encode_url_encoded(parameters: &BTreeMap<String, Value>) -> Bytes {
    let texts = parameters
        .iter()
        .map(|(name, value)| (name.as_str(), parameter_text(value)))
        .collect::<Vec<_>>();
    Bytes::from(encode_pairs(
        texts.iter().map(|(name, value)| (*name, value.as_str())),
    ))
}

pub(crate) fn generate_boundary() -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("reqq-boundary-{token}")
}

pub(crate) async fn encode_multipart(
    boundary: &str,
    parameters: &BTreeMap<String, Value>,
    files: &BTreeMap<String, FileAttachment>,
) -> Result<Bytes, Error> {
    let mut body = BytesMut::new();
    for (name, value) in parameters {
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_quoted(name))
                .as_bytes(),
        );
        body.put_slice(parameter_text(value).as_bytes());
        body.put_slice(b"\r\n");
    }
    for (name, file) in files {
        let data = file.load().await?;
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quoted(name),
                escape_quoted(&file.filename)
            )
            .as_bytes(),
        );
        body.put_slice(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
        body.put_slice(&data);
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(body.freeze())
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
