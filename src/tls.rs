//! mTLS credential loading.
//!
//! Node-to-node RPC is mutually-authenticated TLS with client-certificate
//! verification against a shared CA. This module turns the three
//! configured PEM paths (`ca_cert`, `hostcert`, `hostkey`) into the
//! `tonic::transport` types both the server and the client-side channel
//! pool need.

use std::fs;

use tonic::transport::{Certificate, Identity, ServerTlsConfig};

use crate::error::ChordError;
use crate::node_handle::TlsMaterial;

/// Loads the CA certificate and this node's own certificate/key pair,
/// used both to verify inbound client certs and to present an identity
/// when dialing out.
pub fn load_tls_material(ca_cert: &str, hostcert: &str, hostkey: &str) -> Result<TlsMaterial, ChordError> {
    let ca_pem = fs::read_to_string(ca_cert)
        .map_err(|e| ChordError::Configured(format!("reading ca_cert {}: {}", ca_cert, e)))?;
    let cert_pem = fs::read_to_string(hostcert)
        .map_err(|e| ChordError::Configured(format!("reading hostcert {}: {}", hostcert, e)))?;
    let key_pem = fs::read_to_string(hostkey)
        .map_err(|e| ChordError::Configured(format!("reading hostkey {}: {}", hostkey, e)))?;

    Ok(TlsMaterial {
        ca_certificate: Certificate::from_pem(ca_pem),
        client_identity: Identity::from_pem(cert_pem, key_pem),
    })
}

/// Builds the server-side TLS config: present our own identity, and
/// require+verify a client certificate signed by the shared CA.
pub fn server_tls_config(material: &TlsMaterial) -> ServerTlsConfig {
    ServerTlsConfig::new()
        .identity(material.client_identity.clone())
        .client_ca_root(material.ca_certificate.clone())
}
