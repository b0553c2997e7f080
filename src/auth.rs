use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::body::{BodyFormat, parameter_text};
use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::oauth::{OAuth1Signer, current_timestamp, generate_nonce};
use crate::request::RequestSpec;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AuthenticationType {
    #[default]
    None,
    Basic,
    Token,
    OAuth1,
    OAuth2,
}

impl AuthenticationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::Token => "token",
            Self::OAuth1 => "oauth1",
            Self::OAuth2 => "oauth2",
        }
    }
}

impl std::fmt::Display for AuthenticationType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Default)]
pub struct AuthSigner<'a> {
    credential_store: Option<&'a dyn CredentialStore>,
}

impl<'a> AuthSigner<'a> {
    pub fn new(credential_store: Option<&'a dyn CredentialStore>) -> Self {
        Self { credential_store }
    }

    pub fn authorization(&self, spec: &RequestSpec) -> Result<Option<String>, Error> {
        match spec.authentication_type() {
            AuthenticationType::None => Ok(None),
            AuthenticationType::Basic => self.basic(spec).map(Some),
            AuthenticationType::Token => spec
                .auth_token()
                .map(|token| Some(token.to_owned()))
                .ok_or(Error::MissingCredential {
                    auth: AuthenticationType::Token,
                    field: "auth token",
                }),
            AuthenticationType::OAuth2 => {
                let token = spec
                    .auth_token()
                    .or(spec.oauth_credentials().token.as_deref())
                    .ok_or(Error::MissingCredential {
                        auth: AuthenticationType::OAuth2,
                        field: "access token",
                    })?;
                Ok(Some(format!("Bearer {token}")))
            }
            AuthenticationType::OAuth1 => self.oauth1(spec).map(Some),
        }
    }

    pub fn basic_password(&self, spec: &RequestSpec) -> Option<String> {
        let credentials = spec.basic_credentials();
        if let Some(password) = &credentials.password {
            return Some(password.clone());
        }
        let store = self.credential_store?;
        let service = spec.credential_service()?;
        let username = credentials.username.as_deref()?;
        store.secret(service, username)
    }

    pub fn oauth_token_secret(&self, spec: &RequestSpec) -> Option<String> {
        let credentials = spec.oauth_credentials();
        if let Some(secret) = &credentials.token_secret {
            return Some(secret.clone());
        }
        let store = self.credential_store?;
        let service = spec.credential_service()?;
        let token = credentials.token.as_deref()?;
        store.secret(service, token)
    }

    fn basic(&self, spec: &RequestSpec) -> Result<String, Error> {
        let username =
            spec.basic_credentials()
                .username
                .as_deref()
                .ok_or(Error::MissingCredential {
                    auth: AuthenticationType::Basic,
                    field: "username",
                })?;
        let password = self
            .basic_password(spec)
            .ok_or(Error::MissingCredential {
                auth: AuthenticationType::Basic,
                field: "password",
            })?;
        Ok(format!(
            "Basic {}",
            STANDARD.encode(format!("{username}:{password}"))
        ))
    }

    fn oauth1(&self, spec: &RequestSpec) -> Result<String, Error> {
        let credentials = spec.oauth_credentials();
        let consumer_key = credentials
            .consumer_key
            .as_deref()
            .ok_or(Error::MissingCredential {
                auth: AuthenticationType::OAuth1,
                field: "consumer key",
            })?;
        let consumer_secret =
            credentials
                .consumer_secret
                .as_deref()
                .ok_or(Error::MissingCredential {
                    auth: AuthenticationType::OAuth1,
                    field: "consumer secret",
                })?;

        let mut signer = OAuth1Signer::new(consumer_key, consumer_secret)
            .extra_parameters(spec.oauth_parameters().clone());
        if let Some(token) = &credentials.token {
            let token_secret = self.oauth_token_secret(spec);
            signer = signer.token(token.clone(), token_secret);
        }
        if let Some(callback) = spec.oauth_callback_url() {
            signer = signer.callback(callback);
        }

        let url = spec.url()?;
        let signature = signer.sign(
            spec.method(),
            &url,
            &signature_parameters(spec),
            &generate_nonce(),
            &current_timestamp(),
        )?;
        Ok(signature.authorization_header())
    }
}

impl std::fmt::Debug for AuthSigner<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AuthSigner")
            .field("credential_store", &self.credential_store.is_some())
            .finish()
    }
}

fn signature_parameters(spec: &RequestSpec) -> Vec<(String, String)> {
    let mut parameters = spec
        .query_parameters()
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect::<Vec<_>>();
    if spec.body_format() == BodyFormat::UrlEncoded && !spec.has_raw_body() {
        parameters.extend(
            spec.body_parameters()
                .iter()
                .map(|(name, value)| (name.clone(), parameter_text(value))),
        );
    }
    parameters
}
