use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_TYPE;

use crate::response::Response;
use crate::util::lock_unpoisoned;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            body: response.body().clone(),
        }
    }
}

pub trait ResponseCache: Send + Sync {
    fn lookup(&self, key: &str) -> Option<CachedResponse>;

    fn store(&self, key: &str, response: CachedResponse);
}

#[derive(Default)]
struct CacheEntries {
    bodies: BTreeMap<String, CachedResponse>,
    order: VecDeque<String>,
}

pub struct MemoryCache {
    capacity: usize,
    entries: Mutex<CacheEntries>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(CacheEntries::default()),
        }
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = lock_unpoisoned(&self.entries);
        entries.bodies.clear();
        entries.order.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ResponseCache for MemoryCache {
    fn lookup(&self, key: &str) -> Option<CachedResponse> {
        lock_unpoisoned(&self.entries).bodies.get(key).cloned()
    }

    fn store(&self, key: &str, response: CachedResponse) {
        let mut entries = lock_unpoisoned(&self.entries);
        if entries.bodies.insert(key.to_owned(), response).is_some() {
            entries.order.retain(|existing| existing != key);
        }
        entries.order.push_back(key.to_owned());
        while entries.bodies.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.bodies.remove(&oldest);
        }
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MemoryCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;
    use http::{HeaderMap, HeaderValue, StatusCode};

    use super::{CachedResponse, MemoryCache, ResponseCache};
    use crate::response::Response;

    #[test]
    fn oldest_entry_is_evicted_past_capacity() {
        let cache = MemoryCache::new(2);
        cache.store("a", CachedResponse::new(&b"1"[..]));
        cache.store("b", CachedResponse::new(&b"2"[..]));
        cache.store("a", CachedResponse::new(&b"3"[..]));
        cache.store("c", CachedResponse::new(&b"4"[..]));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("b"), None);
        assert_eq!(
            cache.lookup("a").map(|entry| entry.body),
            Some(Bytes::from_static(b"3"))
        );
        assert_eq!(
            cache.lookup("c").map(|entry| entry.body),
            Some(Bytes::from_static(b"4"))
        );

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn entry_keeps_status_and_content_type_of_the_response() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let response = Response::new(StatusCode::CREATED, headers, Bytes::from_static(b"{}"));

        let entry = CachedResponse::from_response(&response);
        assert_eq!(entry.status, StatusCode::CREATED);
        assert_eq!(
            entry.content_type.as_deref(),
            Some("application/json; charset=utf-8")
        );

        let restored = Response::cached(entry);
        assert!(restored.is_from_cache());
        assert_eq!(restored.status(), StatusCode::CREATED);
        assert_eq!(
            restored.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json; charset=utf-8"))
        );
    }
}
