use std::time::Duration;

use rand::Rng;

use crate::error::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RetryMethod {
    #[default]
    None,
    Fixed,
    ExponentialBackoff,
    RandomizedInterval,
}

impl RetryMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fixed => "fixed",
            Self::ExponentialBackoff => "exponential_backoff",
            Self::RandomizedInterval => "randomized_interval",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryAction {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    method: RetryMethod,
    max_retries: u32,
    min_interval: Duration,
    max_interval: Duration,
}

impl RetryPolicy {
    pub const fn disabled() -> Self {
        Self {
            method: RetryMethod::None,
            max_retries: 0,
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
        }
    }

    pub const fn fixed(interval: Duration, max_retries: u32) -> Self {
        Self {
            method: RetryMethod::Fixed,
            max_retries,
            min_interval: interval,
            max_interval: interval,
        }
    }

    pub const fn exponential_backoff() -> Self {
        Self {
            method: RetryMethod::ExponentialBackoff,
            max_retries: 5,
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
        }
    }

    pub const fn randomized_interval() -> Self {
        Self {
            method: RetryMethod::RandomizedInterval,
            max_retries: 5,
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
        }
    }

    pub const fn method(mut self, method: RetryMethod) -> Self {
        self.method = method;
        self
    }

    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        if self.max_interval < self.min_interval {
            self.max_interval = self.min_interval;
        }
        self
    }

    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval.max(self.min_interval);
        self
    }

    pub const fn configured_method(&self) -> RetryMethod {
        self.method
    }

    pub const fn configured_max_retries(&self) -> u32 {
        self.max_retries
    }

    pub const fn configured_min_interval(&self) -> Duration {
        self.min_interval
    }

    pub const fn configured_max_interval(&self) -> Duration {
        self.max_interval
    }

    pub const fn is_enabled(&self) -> bool {
        !matches!(self.method, RetryMethod::None) && self.max_retries > 0
    }

    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        match self.method {
            RetryMethod::None | RetryMethod::Fixed => self.min_interval,
            RetryMethod::ExponentialBackoff => {
                let capped_exponent = retry_count.min(31);
                let multiplier = 1_u128 << capped_exponent;
                let min_ms = self.min_interval.as_millis();
                let max_ms = self.max_interval.as_millis().max(min_ms);
                let delay_ms = min_ms
                    .saturating_mul(multiplier)
                    .min(max_ms)
                    .min(u64::MAX as u128) as u64;
                Duration::from_millis(delay_ms)
            }
            RetryMethod::RandomizedInterval => {
                let min_ms = self.min_interval.as_millis().min(u64::MAX as u128) as u64;
                let max_ms = self.max_interval.as_millis().min(u64::MAX as u128) as u64;
                if max_ms <= min_ms {
                    return self.min_interval;
                }
                let mut rng = rand::rng();
                Duration::from_millis(rng.random_range(min_ms..=max_ms))
            }
        }
    }

    pub fn decide(&self, retry_count: u32, outcome: &Error) -> RetryAction {
        if !self.is_enabled() || retry_count >= self.max_retries || !outcome.is_retryable() {
            return RetryAction::GiveUp;
        }
        RetryAction::RetryAfter(self.delay_for_retry(retry_count))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Method;

    use super::{RetryAction, RetryMethod, RetryPolicy};
    use crate::error::{Error, TransportErrorKind};

    fn server_error() -> Error {
        Error::HttpStatus {
            status: 503,
            method: Method::GET,
            url: "https://api.example.com/v1/items".to_owned(),
            body: String::new(),
        }
    }

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let policy = RetryPolicy::exponential_backoff()
            .min_interval(Duration::from_secs(1))
            .max_interval(Duration::from_secs(60));

        let delays = (0..8)
            .map(|retry_count| policy.delay_for_retry(retry_count).as_secs())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn exponential_backoff_saturates_for_large_retry_counts() {
        let policy = RetryPolicy::exponential_backoff().max_interval(Duration::from_secs(90));
        assert_eq!(policy.delay_for_retry(u32::MAX), Duration::from_secs(90));
    }

    #[test]
    fn fixed_interval_is_constant() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);
        for retry_count in 0..4 {
            assert_eq!(
                policy.delay_for_retry(retry_count),
                Duration::from_millis(250)
            );
        }
    }

    #[test]
    fn randomized_interval_stays_within_bounds() {
        let policy = RetryPolicy::randomized_interval()
            .min_interval(Duration::from_millis(100))
            .max_interval(Duration::from_millis(300));

        for retry_count in 0..256 {
            let delay = policy.delay_for_retry(retry_count);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn max_interval_never_drops_below_min_interval() {
        let policy = RetryPolicy::exponential_backoff()
            .min_interval(Duration::from_secs(5))
            .max_interval(Duration::from_secs(1));
        assert_eq!(policy.configured_max_interval(), Duration::from_secs(5));
    }

    #[test]
    fn decide_gives_up_when_retries_are_exhausted() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 2);
        assert_eq!(
            policy.decide(0, &server_error()),
            RetryAction::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.decide(1, &server_error()),
            RetryAction::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(policy.decide(2, &server_error()), RetryAction::GiveUp);
    }

    #[test]
    fn decide_gives_up_for_non_retryable_outcomes() {
        let policy = RetryPolicy::exponential_backoff();
        let forbidden = Error::HttpStatus {
            status: 403,
            method: Method::GET,
            url: "https://api.example.com/v1/items".to_owned(),
            body: String::new(),
        };
        let trust = Error::Transport {
            kind: TransportErrorKind::Trust,
            method: Method::GET,
            url: "https://api.example.com/v1/items".to_owned(),
            message: "certificate mismatch".to_owned(),
        };
        assert_eq!(policy.decide(0, &forbidden), RetryAction::GiveUp);
        assert_eq!(policy.decide(0, &trust), RetryAction::GiveUp);
    }

    #[test]
    fn disabled_policy_never_retries() {
        let policy = RetryPolicy::disabled().max_retries(10);
        assert_eq!(policy.configured_method(), RetryMethod::None);
        assert_eq!(policy.decide(0, &server_error()), RetryAction::GiveUp);
    }
}
