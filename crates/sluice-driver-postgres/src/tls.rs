//! TLS support for PostgreSQL sessions

use std::fs;
use std::path::{Path, PathBuf};

use native_tls::{Certificate, Identity, TlsConnector, TlsConnectorBuilder};
use postgres_native_tls::MakeTlsConnector;
use sluice_core::SluiceError;
use strum::{Display, EnumString};
use tracing::debug;

/// libpq-style `sslmode`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum SslMode {
    #[strum(to_string = "disable")]
    Disable,
    #[default]
    #[strum(to_string = "prefer", serialize = "allow")]
    Prefer,
    #[strum(to_string = "require")]
    Require,
    #[strum(to_string = "verify-ca", serialize = "verify_ca")]
    VerifyCa,
    #[strum(to_string = "verify-full", serialize = "verify_full")]
    VerifyFull,
}

impl SslMode {
    pub fn uses_tls(self) -> bool {
        self != Self::Disable
    }

    pub(crate) fn to_postgres(self) -> tokio_postgres::config::SslMode {
        use tokio_postgres::config::SslMode as Pg;
        match self {
            Self::Disable => Pg::Disable,
            Self::Prefer => Pg::Prefer,
            Self::Require | Self::VerifyCa | Self::VerifyFull => Pg::Require,
        }
    }

    pub(crate) fn from_postgres(mode: tokio_postgres::config::SslMode) -> Self {
        use tokio_postgres::config::SslMode as Pg;
        match mode {
            Pg::Disable => Self::Disable,
            Pg::Require => Self::Require,
            _ => Self::Prefer,
        }
    }
}

/// Certificates and verification mode for a TLS session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub mode: SslMode,
    /// PEM-encoded root certificate
    pub ca_cert: Option<PathBuf>,
    /// PEM-encoded client certificate, used together with `client_key`
    pub client_cert: Option<PathBuf>,
    /// PKCS#8 PEM private key for `client_cert`
    pub client_key: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to load certificate from {path}: {source}")]
    CertLoadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid CA certificate: {0}")]
    InvalidCaCert(String),

    #[error("Invalid client identity (cert + key): {0}")]
    InvalidClientIdentity(String),

    #[error("TLS configuration error: {0}")]
    ConfigurationError(String),
}

impl From<TlsError> for SluiceError {
    fn from(err: TlsError) -> Self {
        SluiceError::connection(err.to_string())
    }
}

/// Build a connector for `tokio_postgres` from the session's TLS settings.
///
/// `require` without a CA certificate only encrypts; `verify-ca` checks the
/// chain but not the host name; `verify-full` checks both.
pub fn build_tls_connector(settings: &TlsSettings) -> Result<MakeTlsConnector, TlsError> {
    if !settings.mode.uses_tls() {
        return Err(TlsError::ConfigurationError(
            "sslmode=disable does not use a TLS connector".into(),
        ));
    }

    let mut builder = TlsConnector::builder();
    configure_verification(&mut builder, settings);

    if let Some(path) = &settings.ca_cert {
        let pem = read_pem(path)?;
        let cert =
            Certificate::from_pem(&pem).map_err(|e| TlsError::InvalidCaCert(e.to_string()))?;
        builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) = (&settings.client_cert, &settings.client_key) {
        let cert = read_pem(cert_path)?;
        let key = read_pem(key_path)?;
        let identity = Identity::from_pkcs8(&cert, &key)
            .map_err(|e| TlsError::InvalidClientIdentity(e.to_string()))?;
        builder.identity(identity);
    }

    let connector = builder
        .build()
        .map_err(|e| TlsError::ConfigurationError(e.to_string()))?;
    debug!(mode = %settings.mode, "TLS connector built");
    Ok(MakeTlsConnector::new(connector))
}

fn configure_verification(builder: &mut TlsConnectorBuilder, settings: &TlsSettings) {
    match settings.mode {
        SslMode::Disable | SslMode::VerifyFull => {}
        SslMode::Prefer | SslMode::Require => {
            if settings.ca_cert.is_none() {
                builder.danger_accept_invalid_certs(true);
            }
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::CertLoadFailed {
        path: path.display().to_string(),
        source,
    })
}
