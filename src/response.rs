use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::cache::CachedResponse;
use crate::error::ErrorCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    Unauthorized,
    Forbidden,
    ClientError,
    ServerError,
    NoNetwork,
    Other,
}

impl StatusClass {
    pub fn from_status(status: Option<StatusCode>) -> Self {
        let Some(status) = status else {
            return Self::NoNetwork;
        };
        match status.as_u16() {
            200..=299 => Self::Success,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }

    pub const fn is_error(self) -> bool {
        !matches!(self, Self::Success)
    }

    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ServerError | Self::NoNetwork)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::NoNetwork => "no_network",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    from_cache: bool,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            from_cache: false,
        }
    }

    pub(crate) fn cached(entry: CachedResponse) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = &entry.content_type
            && let Ok(value) = content_type.parse()
        {
            headers.insert(CONTENT_TYPE, value);
        }
        Self {
            status: entry.status,
            headers,
            body: entry.body,
            from_cache: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_status(Some(self.status))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn cache_code(&self) -> Option<ErrorCode> {
        self.from_cache.then_some(ErrorCode::LoadedCachedData)
    }

    pub fn mime_type(&self) -> Option<String> {
        let value = self.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let essence = value.split(';').next().unwrap_or(value).trim();
        if essence.is_empty() {
            return None;
        }
        Some(essence.to_ascii_lowercase())
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    pub fn url_encoded(&self) -> BTreeMap<String, String> {
        url::form_urlencoded::parse(&self.body)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect()
    }
}
