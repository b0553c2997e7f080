use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::util::lock_unpoisoned;

pub trait CredentialStore: Send + Sync {
    fn secret(&self, service: &str, account: &str) -> Option<String>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        service: impl Into<String>,
        account: impl Into<String>,
        secret: impl Into<String>,
    ) {
        lock_unpoisoned(&self.secrets).insert((service.into(), account.into()), secret.into());
    }

    pub fn remove(&self, service: &str, account: &str) -> Option<String> {
        lock_unpoisoned(&self.secrets).remove(&(service.to_owned(), account.to_owned()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn secret(&self, service: &str, account: &str) -> Option<String> {
        lock_unpoisoned(&self.secrets)
            .get(&(service.to_owned(), account.to_owned()))
            .cloned()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let accounts = lock_unpoisoned(&self.secrets).len();
        formatter
            .debug_struct("MemoryCredentialStore")
            .field("accounts", &accounts)
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub token: Option<String>,
    pub token_secret: Option<String>,
}

impl OAuthCredentials {
    pub fn consumer(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            consumer_key: Some(key.into()),
            consumer_secret: Some(secret.into()),
            token: None,
            token_secret: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self.token_secret = Some(token_secret.into());
        self
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer_key.is_some() && self.consumer_secret.is_some()
    }
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OAuthCredentials")
            .field("consumer_key", &self.consumer_key)
            .field(
                "consumer_secret",
                &self.consumer_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("token", &self.token)
            .field(
                "token_secret",
                &self.token_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
