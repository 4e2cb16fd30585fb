//! TLS client configuration for `ldaps://` connections.

use crate::error::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ClientConfig;
use rustls::SignatureScheme;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Accepts any server certificate. Only used when `tls_skip_verify` is set.
#[derive(Debug)]
struct InsecureServerVerifier;

impl ServerCertVerifier for InsecureServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

fn system_roots() -> Result<rustls::RootCertStore> {
    let mut root_store = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs()
        .map_err(|e| Error::Tls(format!("load system CA certs: {}", e)))?;
    let (added, ignored) = root_store.add_parsable_certificates(native);
    debug!("Loaded {} system CA certs ({} ignored)", added, ignored);
    Ok(root_store)
}

/// Parse every certificate in a PEM bundle.
pub fn parse_ca_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("parse CA PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificates in CA PEM".to_string()));
    }
    Ok(certs)
}

/// Client config with system roots plus an optional extra CA bundle.
pub fn client_config(extra_ca_pem: Option<&[u8]>) -> Result<Arc<ClientConfig>> {
    let mut root_store = system_roots()?;
    if let Some(pem) = extra_ca_pem {
        for cert in parse_ca_pem(pem)? {
            root_store
                .add(cert)
                .map_err(|e| Error::Tls(format!("add CA cert: {}", e)))?;
        }
    }
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Client config that skips server certificate verification.
pub fn client_config_insecure() -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(InsecureServerVerifier));
    Arc::new(config)
}

/// Build the client config for the given options; `ca_file` is a PEM bundle on disk.
pub fn load_client_config(skip_verify: bool, ca_file: Option<&Path>) -> Result<Arc<ClientConfig>> {
    if skip_verify {
        return Ok(client_config_insecure());
    }
    match ca_file {
        Some(path) => {
            let pem = fs::read(path)?;
            client_config(Some(&pem))
        }
        None => client_config(None),
    }
}
