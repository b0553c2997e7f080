use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use http::Method;
use rand::Rng;
use rand::distr::Alphanumeric;
use sha1::Sha1;

use crate::auth::AuthenticationType;
use crate::body::BodyFormat;
use crate::error::Error;
use crate::request::RequestSpec;
use crate::util::percent_encode;

pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";
pub const OAUTH_VERSION: &str = "1.0";
pub const XAUTH_MODE_CLIENT: &str = "client_auth";
pub const XAUTH_MODE_REVERSE: &str = "reverse_auth";

const NONCE_LEN: usize = 32;

type HmacSha1 = Hmac<Sha1>;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct OAuth1Signer {
    consumer_key: String,
    consumer_secret: String,
    token: Option<String>,
    token_secret: Option<String>,
    callback: Option<String>,
    extra_parameters: BTreeMap<String, String>,
}

impl OAuth1Signer {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            ..Self::default()
        }
    }

    pub fn token(mut self, token: impl Into<String>, token_secret: Option<String>) -> Self {
        self.token = Some(token.into());
        self.token_secret = token_secret;
        self
    }

    pub fn token_secret(mut self, token_secret: impl Into<String>) -> Self {
        self.token_secret = Some(token_secret.into());
        self
    }

    pub fn callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn extra_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_parameters.insert(name.into(), value.into());
        self
    }

    pub fn extra_parameters<K, V, I>(mut self, parameters: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.extra_parameters.extend(
            parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn signing_key(&self) -> String {
        format!(
            "{}&{}",
            percent_encode(&self.consumer_secret),
            percent_encode(self.token_secret.as_deref().unwrap_or_default())
        )
    }

    fn protocol_parameters(&self, nonce: &str, timestamp: &str) -> BTreeMap<String, String> {
        let mut parameters = BTreeMap::new();
        parameters.insert("oauth_consumer_key".to_owned(), self.consumer_key.clone());
        parameters.insert("oauth_nonce".to_owned(), nonce.to_owned());
        parameters.insert(
            "oauth_signature_method".to_owned(),
            SIGNATURE_METHOD.to_owned(),
        );
        parameters.insert("oauth_timestamp".to_owned(), timestamp.to_owned());
        parameters.insert("oauth_version".to_owned(), OAUTH_VERSION.to_owned());
        if let Some(token) = &self.token {
            parameters.insert("oauth_token".to_owned(), token.clone());
        }
        if let Some(callback) = &self.callback {
            parameters.insert("oauth_callback".to_owned(), callback.clone());
        }
        // Caller supplied values win, including oauth_nonce and oauth_timestamp.
        for (name, value) in &self.extra_parameters {
            parameters.insert(name.clone(), value.clone());
        }
        parameters
    }

    pub fn sign(
        &self,
        method: &Method,
        url: &str,
        request_parameters: &[(String, String)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<OAuth1Signature, Error> {
        let normalized_url = normalize_url(url)?;
        let mut parameters = self.protocol_parameters(nonce, timestamp);

        let mut encoded = parameters
            .iter()
            .chain(request_parameters.iter().map(|(name, value)| (name, value)))
            .map(|(name, value)| (percent_encode(name), percent_encode(value)))
            .collect::<Vec<_>>();
        encoded.sort();
        let normalized_parameters = encoded
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "{}&{}&{}",
            method.as_str().to_ascii_uppercase(),
            percent_encode(&normalized_url),
            percent_encode(&normalized_parameters)
        );
        let signature = hmac_sha1_signature(&self.signing_key(), &base_string)?;
        parameters.insert("oauth_signature".to_owned(), signature.clone());

        Ok(OAuth1Signature {
            base_string,
            signature,
            parameters,
        })
    }
}

impl std::fmt::Debug for OAuth1Signer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OAuth1Signer")
            .field("consumer_key", &self.consumer_key)
            .field("token", &self.token)
            .field("callback", &self.callback)
            .field("extra_parameters", &self.extra_parameters.keys())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuth1Signature {
    pub base_string: String,
    pub signature: String,
    pub parameters: BTreeMap<String, String>,
}

impl OAuth1Signature {
    pub fn authorization_header(&self) -> String {
        let fields = self
            .parameters
            .iter()
            .map(|(name, value)| format!("{}=\"{}\"", percent_encode(name), percent_encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {fields}")
    }
}

pub fn hmac_sha1_signature(key: &str, base_string: &str) -> Result<String, Error> {
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).map_err(|source| Error::Signature {
            message: source.to_string(),
        })?;
    mac.update(base_string.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn normalize_url(url_text: &str) -> Result<String, Error> {
    let parsed = url::Url::parse(url_text).map_err(|_| Error::InvalidUrl {
        url: url_text.to_owned(),
    })?;
    let host = parsed.host_str().ok_or_else(|| Error::InvalidUrl {
        url: url_text.to_owned(),
    })?;
    let port = parsed
        .port()
        .map(|port| format!(":{port}"))
        .unwrap_or_default();
    Ok(format!(
        "{}://{}{}{}",
        parsed.scheme(),
        host.to_ascii_lowercase(),
        port,
        parsed.path()
    ))
}

pub fn generate_nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

pub fn current_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .to_string()
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenResponse {
    pub token: Option<String>,
    pub token_secret: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

impl TokenResponse {
    pub fn parse(body: &[u8]) -> Self {
        let parameters = url::form_urlencoded::parse(body)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect::<BTreeMap<_, _>>();
        Self {
            token: parameters.get("oauth_token").cloned(),
            token_secret: parameters.get("oauth_token_secret").cloned(),
            parameters,
        }
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TokenResponse")
            .field("token", &self.token)
            .field(
                "token_secret",
                &self.token_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish_non_exhaustive()
    }
}

pub fn xauth_access_token_request(
    endpoint: &str,
    username: &str,
    password: &str,
    consumer_key: &str,
    consumer_secret: &str,
) -> RequestSpec {
    let mut spec = xauth_request(endpoint, consumer_key, consumer_secret);
    spec.set_xauth_credentials(username, password);
    spec
}

pub fn xauth_reverse_auth_request(
    endpoint: &str,
    consumer_key: &str,
    consumer_secret: &str,
) -> RequestSpec {
    let mut spec = xauth_request(endpoint, consumer_key, consumer_secret);
    spec.set_body_parameter("x_auth_mode", XAUTH_MODE_REVERSE);
    spec
}

fn xauth_request(endpoint: &str, consumer_key: &str, consumer_secret: &str) -> RequestSpec {
    let mut spec = RequestSpec::from_url(endpoint);
    spec.set_method(Method::POST)
        .set_body_format(BodyFormat::UrlEncoded)
        .set_authentication_type(AuthenticationType::OAuth1)
        .set_oauth_consumer(consumer_key, consumer_secret);
    spec
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::{
        OAuth1Signer, TokenResponse, hmac_sha1_signature, normalize_url,
        xauth_access_token_request, xauth_reverse_auth_request,
    };
    use crate::auth::AuthenticationType;
    use crate::body::BodyFormat;

    fn pairs(values: &[(&str, &str)]) -> Vec<(String, String)> {
        values
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn get_signature_matches_reference_value() {
        let signer = OAuth1Signer::new("consumer-key", "consumer-secret")
            .token("access-token", Some("token-secret".to_owned()));
        let signature = signer
            .sign(
                &Method::GET,
                "https://api.example.com/1/statuses/home_timeline.json?count=20",
                &pairs(&[("count", "20"), ("screen_name", "reqq test")]),
                "abcdef0123456789",
                "1700000000",
            )
            .expect("signing should succeed");

        assert_eq!(
            signature.base_string,
            "GET&https%3A%2F%2Fapi.example.com%2F1%2Fstatuses%2Fhome_timeline.json&count%3D20%26oauth_consumer_key%3Dconsumer-key%26oauth_nonce%3Dabcdef0123456789%26oauth_signature_method%3DHMAC-SHA1%26oauth_timestamp%3D1700000000%26oauth_token%3Daccess-token%26oauth_version%3D1.0%26screen_name%3Dreqq%2520test"
        );
        assert_eq!(signature.signature, "HbGuLoeLx5syJAj7N9uqbWH9zNA=");
    }

    #[test]
    fn post_signature_matches_published_twitter_example() {
        let signer = OAuth1Signer::new(
            "xvz1evFS4wEEPTGEFPHBog",
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
        )
        .token(
            "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            Some("LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".to_owned()),
        );
        let signature = signer
            .sign(
                &Method::POST,
                "https://api.twitter.com/1.1/statuses/update.json",
                &pairs(&[
                    ("include_entities", "true"),
                    (
                        "status",
                        "Hello Ladies + Gentlemen, a signed OAuth request!",
                    ),
                ]),
                "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
                "1318622958",
            )
            .expect("signing should succeed");

        assert_eq!(signature.signature, "hCtSmYh+iHYCEqBWrE7C7hYmtUk=");
        let header = signature.authorization_header();
        assert!(header.starts_with("OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\", "));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
        assert!(!header.contains("status="));
    }

    #[test]
    fn signing_key_uses_empty_token_secret_when_absent() {
        let signer = OAuth1Signer::new("ck", "c&s");
        assert_eq!(signer.signing_key(), "c%26s&");
    }

    #[test]
    fn extra_parameters_override_generated_nonce_and_timestamp() {
        let signer = OAuth1Signer::new("ck", "cs")
            .extra_parameter("oauth_nonce", "fixed")
            .extra_parameter("oauth_timestamp", "42");
        let signature = signer
            .sign(&Method::GET, "https://api.example.com/a", &[], "random", "999")
            .expect("signing should succeed");
        assert_eq!(signature.parameters["oauth_nonce"], "fixed");
        assert_eq!(signature.parameters["oauth_timestamp"], "42");
        assert!(signature.base_string.contains("oauth_nonce%3Dfixed"));
    }

    #[test]
    fn normalized_url_drops_default_port_query_and_fragment() {
        assert_eq!(
            normalize_url("HTTPS://API.Example.com:443/v1/Items?x=1#frag")
                .expect("url should normalize"),
            "https://api.example.com/v1/Items"
        );
        assert_eq!(
            normalize_url("http://localhost:8080/path").expect("url should normalize"),
            "http://localhost:8080/path"
        );
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn hmac_sha1_matches_rfc2202_vector() {
        assert_eq!(
            hmac_sha1_signature("key", "The quick brown fox jumps over the lazy dog")
                .expect("hmac accepts any key length"),
            "3nybhbi3iqa8ino29wqQcBydtNk="
        );
    }

    #[test]
    fn token_response_extracts_token_and_secret() {
        let response =
            TokenResponse::parse(b"oauth_token=abc%20def&oauth_token_secret=s3cr3t&user_id=42");
        assert_eq!(response.token.as_deref(), Some("abc def"));
        assert_eq!(response.token_secret.as_deref(), Some("s3cr3t"));
        assert_eq!(response.parameters["user_id"], "42");
        assert!(!format!("{response:?}").contains("s3cr3t"));
    }

    #[test]
    fn xauth_builders_produce_signed_form_posts() {
        let access = xauth_access_token_request(
            "https://api.example.com/oauth/access_token",
            "alice",
            "p@ss word",
            "ck",
            "cs",
        );
        assert_eq!(access.method(), &Method::POST);
        assert_eq!(access.body_format(), BodyFormat::UrlEncoded);
        assert_eq!(access.authentication_type(), AuthenticationType::OAuth1);
        assert_eq!(
            access.body_parameter("x_auth_mode"),
            Some(&serde_json::json!("client_auth"))
        );
        assert_eq!(
            access.body_parameter("x_auth_username"),
            Some(&serde_json::json!("alice"))
        );

        let reverse =
            xauth_reverse_auth_request("https://api.example.com/oauth/request_token", "ck", "cs");
        assert_eq!(
            reverse.body_parameter("x_auth_mode"),
            Some(&serde_json::json!("reverse_auth"))
        );
        assert!(reverse.body_parameter("x_auth_password").is_none());
    }
}
