//! Support for setting up RusTLS in a consistent fashion.

use rustls::{ClientConfig, RootCertStore};
use rustls_native_certs::load_native_certs;

use crate::common::*;

/// Install `aws-lc-rs` as the process-wide crypto provider.
///
/// Every TLS client we build relies on this, including the one inside
/// `gcp_auth`.
pub(crate) fn install_crypto_provider() {
    // This fails only if a provider is already installed, which is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// RusTLS `ClientConfig` trusting the system's root certificates.
pub(crate) fn rustls_client_config() -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    let cert_result = load_native_certs();
    for cert in cert_result.certs {
        root_store
            .add(cert)
            .context("could not add certificate to cert store")?;
    }
    if root_store.is_empty() {
        if let Some(err) = cert_result.errors.into_iter().next() {
            return Err(err).context("error loading native certs");
        }
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}
