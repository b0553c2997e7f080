use std::path::PathBuf;
use std::time::Duration;

use crate::auth::AuthenticationType;
use crate::credentials::{BasicCredentials, OAuthCredentials};
use crate::request::{DEFAULT_REQUEST_TIMEOUT, RequestSpec};
use crate::retry::RetryPolicy;
use crate::tls::SslTrustMode;

pub const DEFAULT_ACTIVE_REQUEST_LIMIT: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueProfile {
    #[default]
    Standard,
    UnreliableNetwork,
    Background,
}

#[derive(Clone, Debug)]
pub struct ProfileDefaults {
    pub active_request_limit: usize,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl QueueProfile {
    pub fn defaults(self) -> ProfileDefaults {
        match self {
            Self::Standard => ProfileDefaults {
                active_request_limit: DEFAULT_ACTIVE_REQUEST_LIMIT,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                retry_policy: RetryPolicy::disabled(),
            },
            Self::UnreliableNetwork => ProfileDefaults {
                active_request_limit: 2,
                request_timeout: Duration::from_secs(30),
                retry_policy: RetryPolicy::exponential_backoff(),
            },
            Self::Background => ProfileDefaults {
                active_request_limit: 1,
                request_timeout: Duration::from_secs(120),
                retry_policy: RetryPolicy::randomized_interval()
                    .min_interval(Duration::from_secs(5))
                    .max_interval(Duration::from_secs(120)),
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueueDefaults {
    pub base_url: String,
    pub api_version: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Option<Duration>,
    pub authentication_type: AuthenticationType,
    pub basic: BasicCredentials,
    pub oauth: OAuthCredentials,
    pub credential_service: Option<String>,
    pub ssl_trust_mode: SslTrustMode,
    pub pinned_certificate_path: Option<PathBuf>,
    pub retry_policy: RetryPolicy,
}

impl QueueDefaults {
    pub fn has_basic_auth_credentials(&self) -> bool {
        self.basic.username.is_some()
            && (self.basic.password.is_some() || self.credential_service.is_some())
    }

    pub fn has_oauth_credentials(&self) -> bool {
        self.oauth.has_consumer()
    }

    pub fn apply_to(&self, spec: &mut RequestSpec) {
        spec.set_base_url(self.base_url.clone())
            .set_authentication_type(self.authentication_type)
            .set_ssl_trust_mode(self.ssl_trust_mode)
            .set_retry_policy(self.retry_policy)
            .set_oauth_credentials(self.oauth.clone())
            .set_basic_credentials(self.basic.clone());
        if let Some(api_version) = &self.api_version {
            spec.set_api_version(api_version.clone());
        }
        if let Some(user_agent) = &self.user_agent {
            spec.set_user_agent(user_agent.clone());
        }
        if let Some(timeout) = self.timeout {
            spec.set_timeout(timeout);
        }
        if let Some(service) = &self.credential_service {
            spec.set_credential_service(service.clone());
        }
        if let Some(path) = &self.pinned_certificate_path {
            spec.set_pinned_certificate_path(path.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{QueueDefaults, QueueProfile};
    use crate::auth::AuthenticationType;
    use crate::credentials::{BasicCredentials, OAuthCredentials};
    use crate::request::RequestSpec;
    use crate::retry::RetryMethod;
    use crate::tls::SslTrustMode;

    #[test]
    fn unreliable_network_profile_retries_with_backoff() {
        let defaults = QueueProfile::UnreliableNetwork.defaults();
        assert_eq!(defaults.active_request_limit, 2);
        assert_eq!(
            defaults.retry_policy.configured_method(),
            RetryMethod::ExponentialBackoff
        );
        assert_eq!(defaults.retry_policy.configured_max_retries(), 5);
        assert!(!QueueProfile::Standard.defaults().retry_policy.is_enabled());
    }

    #[test]
    fn defaults_are_copied_into_new_specs() {
        let defaults = QueueDefaults {
            base_url: "https://api.example.com".to_owned(),
            api_version: Some("v1".to_owned()),
            user_agent: Some("reqq/1".to_owned()),
            timeout: Some(Duration::from_secs(5)),
            authentication_type: AuthenticationType::Basic,
            basic: BasicCredentials::new("alice", "s3cret"),
            oauth: OAuthCredentials::consumer("ck", "cs"),
            credential_service: Some("example".to_owned()),
            ssl_trust_mode: SslTrustMode::Unenforced,
            pinned_certificate_path: None,
            retry_policy: QueueProfile::UnreliableNetwork.defaults().retry_policy,
        };
        assert!(defaults.has_basic_auth_credentials());
        assert!(defaults.has_oauth_credentials());

        let mut spec = RequestSpec::new("");
        defaults.apply_to(&mut spec);
        spec.set_command("me");

        assert_eq!(
            spec.url().expect("url should build"),
            "https://api.example.com/v1/me"
        );
        assert_eq!(spec.user_agent(), Some("reqq/1"));
        assert_eq!(spec.timeout(), Duration::from_secs(5));
        assert_eq!(spec.authentication_type(), AuthenticationType::Basic);
        assert_eq!(spec.basic_credentials().username.as_deref(), Some("alice"));
        assert_eq!(spec.oauth_credentials().consumer_key.as_deref(), Some("ck"));
        assert_eq!(spec.credential_service(), Some("example"));
        assert_eq!(spec.ssl_trust_mode(), SslTrustMode::Unenforced);
        assert!(spec.retry_policy().is_enabled());
    }
}
