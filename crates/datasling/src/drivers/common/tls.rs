//! TLS for PostgreSQL-protocol sessions, selected by the `sslmode` URL parameter.
//!
//! Mode names follow libpq. Only `verify-ca` and `verify-full` check the
//! server certificate; both verify against the webpki root set.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::error::{Result, SlingError};

/// Value of the `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    /// TLS when the server offers it, plain TCP otherwise. No certificate check.
    #[default]
    Prefer,
    /// TLS required, certificate not checked.
    Require,
    VerifyCa,
    VerifyFull,
}

const MODES: [(&str, SslMode); 5] = [
    ("disable", SslMode::Disable),
    ("prefer", SslMode::Prefer),
    ("require", SslMode::Require),
    ("verify-ca", SslMode::VerifyCa),
    ("verify-full", SslMode::VerifyFull),
];

impl SslMode {
    /// Parse a libpq mode name; empty means the default (`prefer`).
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return Ok(SslMode::default());
        }
        MODES
            .iter()
            .find(|(name, _)| *name == raw)
            .map(|(_, mode)| *mode)
            .ok_or_else(|| {
                let names: Vec<&str> = MODES.iter().map(|(n, _)| *n).collect();
                SlingError::Config(format!(
                    "unknown sslmode '{}' (expected one of: {})",
                    raw,
                    names.join(", ")
                ))
            })
    }

    /// Whether the server certificate is checked.
    pub fn verifies_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }

    /// Mode negotiated at the protocol level.
    ///
    /// tokio-postgres only knows disable/prefer/require; verification
    /// lives in the rustls config.
    pub fn protocol_mode(&self) -> PgSslMode {
        match self {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            _ => PgSslMode::Require,
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = MODES
            .iter()
            .find(|(_, mode)| mode == self)
            .map(|(name, _)| *name)
            .unwrap_or("prefer");
        f.write_str(name)
    }
}

/// Builds the connector handed to `tokio_postgres::Config::connect`.
pub struct TlsBuilder {
    mode: SslMode,
}

impl TlsBuilder {
    pub fn new(mode: SslMode) -> Self {
        Self { mode }
    }

    /// `None` for `sslmode=disable`.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        if self.mode == SslMode::Disable {
            return Ok(None);
        }
        Ok(Some(MakeRustlsConnect::new(self.client_config())))
    }

    fn client_config(&self) -> ClientConfig {
        if self.mode.verifies_certificate() {
            debug!("sslmode={}: verifying server certificate", self.mode);
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            return ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
        }

        if self.mode == SslMode::Require {
            warn!("sslmode=require does not verify the server certificate; use verify-full to check it");
        }
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth()
    }
}

/// Accepts every server certificate. Used for `prefer` and `require`.
#[derive(Debug)]
struct AcceptAnyCert;

const SCHEMES: [SignatureScheme; 9] = [
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PSS_SHA512,
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
];

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        SCHEMES.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        for (name, mode) in MODES {
            assert_eq!(SslMode::parse(name).unwrap(), mode);
            assert_eq!(mode.to_string(), name);
        }
        assert_eq!(SslMode::parse(" VERIFY-FULL ").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Prefer);

        let err = SslMode::parse("allow").unwrap_err();
        assert!(err.to_string().contains("verify-full"));
    }

    #[test]
    fn test_protocol_mode() {
        assert!(matches!(SslMode::Disable.protocol_mode(), PgSslMode::Disable));
        assert!(matches!(SslMode::Prefer.protocol_mode(), PgSslMode::Prefer));
        assert!(matches!(SslMode::VerifyCa.protocol_mode(), PgSslMode::Require));
        assert!(matches!(SslMode::VerifyFull.protocol_mode(), PgSslMode::Require));
    }

    #[test]
    fn test_only_verify_modes_check_certificates() {
        assert!(!SslMode::Prefer.verifies_certificate());
        assert!(!SslMode::Require.verifies_certificate());
        assert!(SslMode::VerifyCa.verifies_certificate());
    }

    #[test]
    fn test_builder() {
        assert!(TlsBuilder::new(SslMode::Disable).build().unwrap().is_none());
        assert!(TlsBuilder::new(SslMode::Require).build().unwrap().is_some());
        assert!(TlsBuilder::new(SslMode::VerifyFull).build().unwrap().is_some());
    }
}
