use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, SignatureScheme};
use tracing::warn;

use crate::error::Error;
use crate::util::lock_unpoisoned;

type Certificates = Arc<[CertificateDer<'static>]>;

static PINNED_CERTIFICATES: LazyLock<Mutex<HashMap<PathBuf, Certificates>>> =
    LazyLock::new(Mutex::default);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SslTrustMode {
    #[default]
    ValidCertificatesOnly,
    PinnedCertificatesOnly,
    Unenforced,
}

impl SslTrustMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidCertificatesOnly => "valid_certificates_only",
            Self::PinnedCertificatesOnly => "pinned_certificates_only",
            Self::Unenforced => "unenforced",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustDecision {
    Accept,
    ValidateChain,
    Reject { reason: String },
}

impl TrustDecision {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Reject { .. })
    }
}

#[derive(Clone, Debug)]
pub struct TrustEvaluator {
    mode: SslTrustMode,
    pinned_path: Option<PathBuf>,
    pinned: Certificates,
}

impl TrustEvaluator {
    pub fn valid_certificates_only() -> Self {
        Self {
            mode: SslTrustMode::ValidCertificatesOnly,
            pinned_path: None,
            pinned: Vec::new().into(),
        }
    }

    pub fn unenforced() -> Self {
        Self {
            mode: SslTrustMode::Unenforced,
            pinned_path: None,
            pinned: Vec::new().into(),
        }
    }

    pub fn pinned(certificates: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            mode: SslTrustMode::PinnedCertificatesOnly,
            pinned_path: None,
            pinned: certificates
                .into_iter()
                .map(CertificateDer::from)
                .collect::<Vec<_>>()
                .into(),
        }
    }

    pub async fn load(
        mode: SslTrustMode,
        pinned_certificate_path: Option<&Path>,
    ) -> Result<Self, Error> {
        match mode {
            SslTrustMode::ValidCertificatesOnly => Ok(Self::valid_certificates_only()),
            SslTrustMode::Unenforced => Ok(Self::unenforced()),
            SslTrustMode::PinnedCertificatesOnly => {
                let path = require_pinned_path(pinned_certificate_path)?;
                let pinned = load_certificates(path).await?;
                Ok(Self {
                    mode,
                    pinned_path: Some(path.to_path_buf()),
                    pinned,
                })
            }
        }
    }

    pub fn mode(&self) -> SslTrustMode {
        self.mode
    }

    pub fn pinned_certificates(&self) -> &[CertificateDer<'static>] {
        &self.pinned
    }

    pub(crate) fn cache_key(&self) -> String {
        match &self.pinned_path {
            Some(path) => format!("{}:{}", self.mode.as_str(), path.display()),
            None if self.mode == SslTrustMode::PinnedCertificatesOnly => {
                let total: usize = self.pinned.iter().map(|cert| cert.len()).sum();
                format!("{}:inline:{}:{total}", self.mode.as_str(), self.pinned.len())
            }
            None => self.mode.as_str().to_owned(),
        }
    }

    pub fn evaluate(&self, presented: &[u8]) -> TrustDecision {
        match self.mode {
            SslTrustMode::ValidCertificatesOnly => TrustDecision::ValidateChain,
            SslTrustMode::Unenforced => TrustDecision::Accept,
            SslTrustMode::PinnedCertificatesOnly => {
                if self.pinned.is_empty() {
                    return TrustDecision::Reject {
                        reason: "no pinned certificates loaded".to_owned(),
                    };
                }
                if self
                    .pinned
                    .iter()
                    .any(|pinned| pinned.as_ref() == presented)
                {
                    TrustDecision::Accept
                } else {
                    TrustDecision::Reject {
                        reason: "server certificate does not match pinned certificate".to_owned(),
                    }
                }
            }
        }
    }

    pub fn client_config(&self) -> Result<rustls::ClientConfig, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|source| Error::TlsConfig {
                message: source.to_string(),
            })?;

        let config = match self.mode {
            SslTrustMode::ValidCertificatesOnly => {
                let root_store = rustls::RootCertStore::from_iter(
                    webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
                );
                builder
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
            SslTrustMode::PinnedCertificatesOnly | SslTrustMode::Unenforced => {
                if self.mode == SslTrustMode::Unenforced {
                    warn!("tls trust is unenforced; any server certificate will be accepted");
                }
                let verifier = EvaluatorVerifier {
                    evaluator: self.clone(),
                    provider,
                };
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_no_client_auth()
            }
        };
        Ok(config)
    }
}

impl Default for TrustEvaluator {
    fn default() -> Self {
        Self::valid_certificates_only()
    }
}

pub(crate) fn require_pinned_path(pinned_certificate_path: Option<&Path>) -> Result<&Path, Error> {
    pinned_certificate_path.ok_or_else(|| Error::PinnedCertificate {
        path: String::new(),
        message: "pinned trust mode requires a certificate path".to_owned(),
    })
}

async fn load_certificates(path: &Path) -> Result<Certificates, Error> {
    let cached = lock_unpoisoned(&*PINNED_CERTIFICATES).get(path).cloned();
    if let Some(certificates) = cached {
        return Ok(certificates);
    }

    let raw = tokio::fs::read(path)
        .await
        .map_err(|source| Error::PinnedCertificate {
            path: path.display().to_string(),
            message: source.to_string(),
        })?;
    let certificates: Certificates = parse_certificates(path, raw)?.into();
    lock_unpoisoned(&*PINNED_CERTIFICATES).insert(path.to_path_buf(), Arc::clone(&certificates));
    Ok(certificates)
}

fn parse_certificates(
    path: &Path,
    raw: Vec<u8>,
) -> Result<Vec<CertificateDer<'static>>, Error> {
    let path_text = path.display().to_string();

    if !raw.starts_with(b"-----BEGIN") {
        if raw.is_empty() {
            return Err(Error::PinnedCertificate {
                path: path_text,
                message: "certificate file is empty".to_owned(),
            });
        }
        return Ok(vec![CertificateDer::from(raw)]);
    }

    let mut certificates = Vec::new();
    for item in CertificateDer::pem_slice_iter(&raw) {
        let certificate = item.map_err(|source| Error::PinnedCertificate {
            path: path_text.clone(),
            message: format!("failed to parse PEM certificate: {source}"),
        })?;
        certificates.push(certificate);
    }
    if certificates.is_empty() {
        return Err(Error::PinnedCertificate {
            path: path_text,
            message: "no certificate blocks found in PEM file".to_owned(),
        });
    }
    Ok(certificates)
}

#[derive(Debug)]
struct EvaluatorVerifier {
    evaluator: TrustEvaluator,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for EvaluatorVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.evaluator.evaluate(end_entity.as_ref()) {
            TrustDecision::Accept => Ok(ServerCertVerified::assertion()),
            TrustDecision::ValidateChain | TrustDecision::Reject { .. } => Err(
                rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure),
            ),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
