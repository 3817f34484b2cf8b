//! TLS configuration and certificate loading.
//!
//! One certificate/key pair serves two purposes: it terminates TLS on the
//! listener, and the certificate becomes the trust root for backend dials.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Certificate and key file pair (PEM).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerTls {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl ServerTls {
    /// Certificate and key paths, loaded at start.
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// Transport credentials handed to endpoint registrants for backend dials.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportCredentials {
    /// Plaintext connection.
    #[default]
    Insecure,
    /// TLS, trusting the DER-encoded roots.
    Tls { roots: Vec<Vec<u8>> },
}

impl TransportCredentials {
    /// Whether backend dials use TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self, TransportCredentials::Tls { .. })
    }
}

/// Load the listener's TLS configuration from certificate and key files.
pub async fn load_tls_config(tls: &ServerTls) -> Result<RustlsConfig, GatewayError> {
    ensure_exists(&tls.cert_path, "certificate file not found")?;
    ensure_exists(&tls.key_path, "private key file not found")?;

    RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| GatewayError::Tls {
            path: tls.cert_path.clone(),
            reason: e.to_string(),
        })
}

/// Read the certificate file as backend client roots.
pub fn load_client_credentials(cert_path: &Path) -> Result<TransportCredentials, GatewayError> {
    let tls_error = |reason: String| GatewayError::Tls {
        path: cert_path.to_path_buf(),
        reason,
    };

    let file = File::open(cert_path).map_err(|e| tls_error(e.to_string()))?;
    let mut reader = BufReader::new(file);

    let roots = rustls_pemfile::certs(&mut reader)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(e.to_string()))?;

    if roots.is_empty() {
        return Err(tls_error("no certificates found".to_string()));
    }

    Ok(TransportCredentials::Tls { roots })
}

fn ensure_exists(path: &Path, reason: &str) -> Result<(), GatewayError> {
    if path.exists() {
        Ok(())
    } else {
        Err(GatewayError::Tls {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        })
    }
}
