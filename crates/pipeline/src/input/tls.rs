//! 서버 측 TLS 설정 (tcp_input, http_input 공용)

use std::path::PathBuf;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::version::{TLS12, TLS13};
use serde::{Deserialize, Serialize};
use tokio_rustls::TlsAcceptor;

use crate::error::BuildError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub certificate: Option<PathBuf>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    /// 1.0, 1.1, 1.2, 1.3. 0이면 가장 낮은 버전입니다.
    #[serde(default)]
    pub min_version: f32,
}

/// TLS 최소 버전
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinVersion {
    Tls12,
    Tls13,
}

impl TlsConfig {
    /// 설정된 최소 버전을 해석합니다. 1.0과 1.1은 1.2로 올립니다.
    pub fn min_version(&self) -> Result<MinVersion, BuildError> {
        match (self.min_version * 10.0).round() as i32 {
            0 | 12 => Ok(MinVersion::Tls12),
            10 | 11 => {
                tracing::warn!(
                    min_version = self.min_version,
                    "TLS 1.0 and 1.1 are not supported, using TLS 1.2 as the minimum"
                );
                Ok(MinVersion::Tls12)
            }
            13 => Ok(MinVersion::Tls13),
            _ => Err(BuildError::Tls(format!(
                "unsupported tls version: {}",
                self.min_version
            ))),
        }
    }

    /// 활성화된 경우 acceptor를 만듭니다. 인증서와 키를 읽지 못하면 빌드 에러입니다.
    pub fn build_acceptor(&self) -> Result<Option<TlsAcceptor>, BuildError> {
        if !self.enable {
            return Ok(None);
        }
        let certificate = self.certificate.as_ref().ok_or_else(|| {
            BuildError::config("tls.certificate", "required when TLS is enabled")
        })?;
        let private_key = self.private_key.as_ref().ok_or_else(|| {
            BuildError::config("tls.private_key", "required when TLS is enabled")
        })?;

        let certs = CertificateDer::pem_file_iter(certificate)
            .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
            .map_err(|e| {
                BuildError::Tls(format!("failed to load certificate {}: {e}", certificate.display()))
            })?;
        if certs.is_empty() {
            return Err(BuildError::Tls(format!(
                "no certificate found in {}",
                certificate.display()
            )));
        }
        let key = PrivateKeyDer::from_pem_file(private_key).map_err(|e| {
            BuildError::Tls(format!("failed to load private key {}: {e}", private_key.display()))
        })?;

        let versions = match self.min_version()? {
            MinVersion::Tls12 => vec![&TLS13, &TLS12],
            MinVersion::Tls13 => vec![&TLS13],
        };
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| BuildError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| BuildError::Tls(format!("invalid certificate or key: {e}")))?;

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_version: f32) -> TlsConfig {
        TlsConfig {
            min_version,
            ..TlsConfig::default()
        }
    }

    #[test]
    fn legacy_versions_fall_back_to_tls12() {
        assert_eq!(config(1.0).min_version().unwrap(), MinVersion::Tls12);
        assert_eq!(config(1.1).min_version().unwrap(), MinVersion::Tls12);
        assert_eq!(config(0.0).min_version().unwrap(), MinVersion::Tls12);
        assert_eq!(config(1.3).min_version().unwrap(), MinVersion::Tls13);
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(matches!(config(2.0).min_version(), Err(BuildError::Tls(_))));
    }

    #[test]
    fn disabled_tls_needs_no_files() {
        assert!(TlsConfig::default().build_acceptor().unwrap().is_none());
    }

    #[test]
    fn enabled_tls_requires_certificate() {
        let tls = TlsConfig {
            enable: true,
            ..TlsConfig::default()
        };
        assert!(tls.build_acceptor().is_err());
    }

    #[test]
    fn missing_files_are_reported() {
        let tls = TlsConfig {
            enable: true,
            certificate: Some("/nonexistent/cert.pem".into()),
            private_key: Some("/nonexistent/key.pem".into()),
            min_version: 1.2,
        };
        let err = tls.build_acceptor().err().unwrap();
        assert!(err.to_string().contains("cert.pem"), "{err}");
    }
}
