#![cfg(feature = "http-key-service")]

//! HTTP implementation of the [`KeyService`] collaborator.
//!
//! Fetches session key material from the backend over TLS. The backend
//! returns a JSON document with base64-encoded key and ticket fields.

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;

use keyturn_crypto::{Ticket, KEY_LEN};

use crate::backend::{KeyService, LockId, SessionKeyMaterial};
use crate::errors::BackendError;

#[derive(Deserialize)]
struct SessionKeyDocument {
    session_key: String,
    ticket: String,
}

#[derive(Clone)]
pub struct HttpKeyService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpKeyService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| BackendError::KeyRequestFailed(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn key_url(&self, lock: &LockId) -> String {
        format!("{}/v1/locks/{}/session-key", self.base_url, lock)
    }
}

#[async_trait]
impl KeyService for HttpKeyService {
    async fn request_session_key(
        &self,
        lock: &LockId,
    ) -> Result<SessionKeyMaterial, BackendError> {
        let resp = self
            .client
            .get(self.key_url(lock))
            .send()
            .await
            .map_err(|e| BackendError::KeyRequestFailed(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(BackendError::KeyRequestFailed(format!(
                "status={}",
                resp.status()
            )));
        }

        let doc: SessionKeyDocument = resp
            .json()
            .await
            .map_err(|e| BackendError::KeyRequestFailed(e.to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        let key_bytes = engine
            .decode(&doc.session_key)
            .map_err(|e| BackendError::KeyRequestFailed(format!("bad key encoding: {e}")))?;
        let key: [u8; KEY_LEN] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| BackendError::KeyRequestFailed("bad key length".into()))?;

        let ticket_bytes = engine
            .decode(&doc.ticket)
            .map_err(|e| BackendError::KeyRequestFailed(format!("bad ticket encoding: {e}")))?;
        let ticket = Ticket::from_bytes(&ticket_bytes)
            .map_err(|e| BackendError::KeyRequestFailed(e.to_string()))?;

        Ok(SessionKeyMaterial { key, ticket })
    }
}
