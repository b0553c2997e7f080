use crate::error::Error;
use crate::lifecycle::{Progress, Request};
use crate::response::Response;

pub trait RequestListener: Send + Sync {
    fn will_start(&self, _request: &Request) {}

    fn did_start(&self, _request: &Request) {}

    fn did_upload(&self, _request: &Request, _progress: Progress) {}

    fn did_download(&self, _request: &Request, _progress: Progress) {}

    fn did_finish(&self, _request: &Request) {}

    fn did_fail(&self, _request: &Request, _error: &Error) {}

    fn did_write_to_cache(&self, _request: &Request) {}

    fn forbidden(&self, _request: &Request) {}
}

type Callback = Box<dyn Fn(&Request) + Send + Sync>;
type ProgressCallback = Box<dyn Fn(&Request, Progress) + Send + Sync>;
type FailureCallback = Box<dyn Fn(&Request, &Error) + Send + Sync>;

#[derive(Default)]
pub struct RequestCallbacks {
    will_start: Option<Callback>,
    did_start: Option<Callback>,
    did_upload: Option<ProgressCallback>,
    did_download: Option<ProgressCallback>,
    did_finish: Option<Callback>,
    did_fail: Option<FailureCallback>,
    did_write_to_cache: Option<Callback>,
    forbidden: Option<Callback>,
}

impl RequestCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_will_start(mut self, callback: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.will_start = Some(Box::new(callback));
        self
    }

    pub fn on_did_start(mut self, callback: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.did_start = Some(Box::new(callback));
        self
    }

    pub fn on_upload(
        mut self,
        callback: impl Fn(&Request, Progress) + Send + Sync + 'static,
    ) -> Self {
        self.did_upload = Some(Box::new(callback));
        self
    }

    pub fn on_download(
        mut self,
        callback: impl Fn(&Request, Progress) + Send + Sync + 'static,
    ) -> Self {
        self.did_download = Some(Box::new(callback));
        self
    }

    pub fn on_finish(mut self, callback: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.did_finish = Some(Box::new(callback));
        self
    }

    pub fn on_fail(mut self, callback: impl Fn(&Request, &Error) + Send + Sync + 'static) -> Self {
        self.did_fail = Some(Box::new(callback));
        self
    }

    pub fn on_write_to_cache(
        mut self,
        callback: impl Fn(&Request) + Send + Sync + 'static,
    ) -> Self {
        self.did_write_to_cache = Some(Box::new(callback));
        self
    }

    pub fn on_forbidden(mut self, callback: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.forbidden = Some(Box::new(callback));
        self
    }
}

impl RequestListener for RequestCallbacks {
    fn will_start(&self, request: &Request) {
        if let Some(callback) = &self.will_start {
            callback(request);
        }
    }

    fn did_start(&self, request: &Request) {
        if let Some(callback) = &self.did_start {
            callback(request);
        }
    }

    fn did_upload(&self, request: &Request, progress: Progress) {
        if let Some(callback) = &self.did_upload {
            callback(request, progress);
        }
    }

    fn did_download(&self, request: &Request, progress: Progress) {
        if let Some(callback) = &self.did_download {
            callback(request, progress);
        }
    }

    fn did_finish(&self, request: &Request) {
        if let Some(callback) = &self.did_finish {
            callback(request);
        }
    }

    fn did_fail(&self, request: &Request, error: &Error) {
        if let Some(callback) = &self.did_fail {
            callback(request, error);
        }
    }

    fn did_write_to_cache(&self, request: &Request) {
        if let Some(callback) = &self.did_write_to_cache {
            callback(request);
        }
    }

    fn forbidden(&self, request: &Request) {
        if let Some(callback) = &self.forbidden {
            callback(request);
        }
    }
}

impl std::fmt::Debug for RequestCallbacks {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestCallbacks")
            .field("will_start", &self.will_start.is_some())
            .field("did_start", &self.did_start.is_some())
            .field("did_upload", &self.did_upload.is_some())
            .field("did_download", &self.did_download.is_some())
            .field("did_finish", &self.did_finish.is_some())
            .field("did_fail", &self.did_fail.is_some())
            .field("did_write_to_cache", &self.did_write_to_cache.is_some())
            .field("forbidden", &self.forbidden.is_some())
            .finish()
    }
}

pub trait ResponseValidator: Send + Sync {
    fn validate(&self, request: &Request, response: &Response) -> Result<(), String>;
}

impl<F> ResponseValidator for F
where
    F: Fn(&Request, &Response) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, request: &Request, response: &Response) -> Result<(), String> {
        self(request, response)
    }
}

pub trait QueueDelegate: Send + Sync {
    fn will_start(&self, _request: &Request) {}

    fn did_start(&self, _request: &Request) {}

    fn did_finish(&self, _request: &Request) {}

    fn should_retry(&self, _request: &Request, _error: &Error) -> bool {
        true
    }

    fn did_become_idle(&self, _queue_name: &str) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    use super::{RequestCallbacks, RequestListener, ResponseValidator};
    use crate::lifecycle::{Progress, Request};
    use crate::request::RequestSpec;
    use crate::response::Response;

    #[test]
    fn callbacks_table_dispatches_only_registered_slots() {
        let finished = Arc::new(AtomicUsize::new(0));
        let downloaded = Arc::new(AtomicUsize::new(0));
        let callbacks = RequestCallbacks::new()
            .on_finish({
                let finished = Arc::clone(&finished);
                move |_| {
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_download({
                let downloaded = Arc::clone(&downloaded);
                move |_, progress| {
                    downloaded.store(progress.transferred as usize, Ordering::SeqCst);
                }
            });

        let request = Request::new(RequestSpec::new("https://api.example.com"));
        callbacks.will_start(&request);
        callbacks.did_finish(&request);
        callbacks.did_download(
            &request,
            Progress {
                transferred: 64,
                total: None,
            },
        );

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(downloaded.load(Ordering::SeqCst), 64);
        let debug = format!("{callbacks:?}");
        assert!(debug.contains("did_finish: true"));
        assert!(debug.contains("will_start: false"));
    }

    #[test]
    fn closures_act_as_validators() {
        let validator = |_: &Request, response: &Response| {
            if response.body().is_empty() {
                Err("empty body".to_owned())
            } else {
                Ok(())
            }
        };
        let request = Request::new(RequestSpec::new("https://api.example.com"));
        let empty = Response::new(StatusCode::OK, HeaderMap::new(), Bytes::new());
        let full = Response::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"x"));

        assert_eq!(
            validator.validate(&request, &empty),
            Err("empty body".to_owned())
        );
        assert_eq!(validator.validate(&request, &full), Ok(()));
    }
}
