//! TLS certificate bundle resource.
//!
//! The payload is a JSON object mapping file names to base64-encoded PEM
//! contents, mounted by HAProxy. HAProxy refuses to start without at least
//! one certificate, so an empty bundle is replaced by an expired
//! self-signed placeholder.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{with_location_attributes, Resource, SecretLocation};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::secrets::SecretStore;

/// File name of the placeholder certificate.
pub const DEFAULT_CERTIFICATE_NAME: &str = "clearblade-0.pem";

/// Expired self-signed key and certificate, stored verbatim (not base64).
pub const DEFAULT_CERTIFICATE_PEM: &str = include_str!("default_certificate.pem");

/// Build the secret payload for a certificate map.
pub fn certificate_payload(
    certificates: &BTreeMap<String, String>,
) -> Result<Zeroizing<Vec<u8>>, ProviderError> {
    let mut encoded: BTreeMap<&str, String> = certificates
        .iter()
        .map(|(name, pem)| (name.as_str(), general_purpose::STANDARD.encode(pem.as_bytes())))
        .collect();
    if encoded.is_empty() {
        encoded.insert(DEFAULT_CERTIFICATE_NAME, DEFAULT_CERTIFICATE_PEM.to_string());
    }
    Ok(Zeroizing::new(serde_json::to_vec(&encoded)?))
}

/// Recover the certificate map from a stored payload.
///
/// A payload holding only the placeholder maps back to an empty map.
pub fn certificates_from_payload(
    payload: &[u8],
) -> Result<BTreeMap<String, String>, ProviderError> {
    let encoded: BTreeMap<String, String> = serde_json::from_slice(payload)
        .map_err(|e| ProviderError::Validation(format!("invalid certificate payload: {}", e)))?;

    if encoded.len() == 1
        && encoded.get(DEFAULT_CERTIFICATE_NAME).map(String::as_str) == Some(DEFAULT_CERTIFICATE_PEM)
    {
        return Ok(BTreeMap::new());
    }

    encoded
        .into_iter()
        .map(|(name, data)| {
            let pem = general_purpose::STANDARD
                .decode(data.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| {
                    ProviderError::Validation(format!("certificate {} is not base64 PEM", name))
                })?;
            Ok((name, pem))
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct TlsCertificateState {
    #[serde(flatten)]
    location: SecretLocation,
    #[serde(default)]
    tls_certificates: Option<BTreeMap<String, String>>,
    #[serde(default)]
    secret_id: Option<String>,
}

impl TlsCertificateState {
    fn from_value(value: Value) -> Result<Self, ProviderError> {
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Validation(format!("Invalid TLS certificate state: {}", e)))
    }

    fn payload(&self) -> Result<Zeroizing<Vec<u8>>, ProviderError> {
        certificate_payload(self.tls_certificates.as_ref().unwrap_or(&BTreeMap::new()))
            .map_err(|e| e.context("Failed to get secret bytes"))
    }
}

/// `clearblade-google_tls_certificate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsCertificate;

#[async_trait]
impl Resource for TlsCertificate {
    fn name(&self) -> &'static str {
        "tls_certificate"
    }

    fn display_name(&self) -> &'static str {
        "TLS certificate"
    }

    fn schema(&self) -> Schema {
        with_location_attributes(
            Schema::v0().with_description("ClearBlade TLS certificates"),
            "GCP project Id for storing TLS certificates",
        )
        .with_attribute(
            "tls_certificates",
            Attribute::required_string_map()
                .sensitive()
                .with_description("Map of certificate file name to PEM contents"),
        )
    }

    async fn create(&self, store: &dyn SecretStore, planned: Value) -> Result<Value, ProviderError> {
        let mut state = TlsCertificateState::from_value(planned)?;
        let payload = state.payload()?;

        state.location.create(store).await?;
        state.secret_id = Some(state.location.secret_id());
        state
            .location
            .write(store, &payload)
            .await
            .map_err(|e| e.context("Failed to create tls certificate secret"))?;
        info!(secret_id = %state.location.secret_id(), "stored TLS certificates");
        Ok(serde_json::to_value(state)?)
    }

    async fn read(&self, store: &dyn SecretStore, current: Value) -> Result<Value, ProviderError> {
        let mut state = TlsCertificateState::from_value(current)?;
        let payload = Zeroizing::new(
            state
                .location
                .read(store)
                .await
                .map_err(|e| e.context("Failed to get TLS certificate secret"))?,
        );
        if payload.is_empty() {
            return Err(ProviderError::Sdk(
                "Failed to get TLS certificate secret data: Empty payload".to_string(),
            ));
        }
        if state.tls_certificates.is_none() {
            debug!("reconstructing tls_certificates from stored payload");
            state.tls_certificates = Some(certificates_from_payload(&payload)?);
        }
        state.secret_id = Some(state.location.secret_id());
        Ok(serde_json::to_value(state)?)
    }

    async fn update(
        &self,
        store: &dyn SecretStore,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let mut state = TlsCertificateState::from_value(planned)?;
        let payload = state.payload()?;
        state
            .location
            .write(store, &payload)
            .await
            .map_err(|e| e.context("Failed to update tls certificate"))?;
        state.secret_id = Some(state.location.secret_id());
        Ok(serde_json::to_value(state)?)
    }
}
