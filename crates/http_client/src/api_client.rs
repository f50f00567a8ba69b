// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;

use crate::api_client_core::implementation::redact_key;
use crate::api_client_core::{ApiClientCore, ApiClientCoreImpl, ClientOptions};
use crate::error::HttpError;

/// Helper for querying the registry and the AMS/AUTHN APIs.
#[derive(Clone)]
pub struct BaseApiClient {
    // 99% of the time this is going to be ApiClientCoreImpl, but it's overrideable for mocking purposes
    core: Arc<dyn ApiClientCore + Send + Sync>,
}

impl<Core: ApiClientCore + Send + Sync + 'static> From<Core> for BaseApiClient {
    fn from(core: Core) -> Self {
        Self {
            core: Arc::new(core),
        }
    }
}

impl BaseApiClient {
    /// Construct a new client backed by reqwest with the given TLS options.
    pub fn new(options: &ClientOptions) -> Result<Self, HttpError> {
        Ok(ApiClientCoreImpl::new(options)?.into())
    }

    /// Get JSON. Returns error for >=400 status.
    pub async fn json_get<O: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<O, HttpError> {
        let bytes = self
            .raw_request(Method::GET, url, None, "", "application/json")
            .await?;
        decode_json(url, bytes)
    }

    /// Post JSON, get JSON. Returns error for >=400 status.
    pub async fn json_json_post<I: serde::Serialize, O: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        payload: &I,
    ) -> Result<O, HttpError> {
        self.json_json_request(Method::POST, url, payload).await
    }

    /// Put JSON, get JSON. Returns error for >=400 status.
    pub async fn json_json_put<I: serde::Serialize, O: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        payload: &I,
    ) -> Result<O, HttpError> {
        self.json_json_request(Method::PUT, url, payload).await
    }

    /// Post JSON, ignoring whatever the response body holds. Returns error for >=400 status.
    pub async fn json_empty_post<I: serde::Serialize>(
        &self,
        url: &str,
        payload: &I,
    ) -> Result<(), HttpError> {
        let body = encode_json(&Method::POST, url, payload)?;
        self.raw_request(Method::POST, url, Some(body), "application/json", "")
            .await
            .map(|_| ())
    }

    /// Put with an empty body, ignoring the response body. Returns error for >=400 status.
    pub async fn empty_empty_put(&self, url: &str) -> Result<(), HttpError> {
        self.raw_request(Method::PUT, url, None, "", "")
            .await
            .map(|_| ())
    }

    /// Delete, ignoring whatever the body holds. Returns error for >=400 status.
    pub async fn delete(&self, url: &str) -> Result<(), HttpError> {
        self.raw_request(Method::DELETE, url, None, "", "")
            .await
            .map(|_| ())
    }

    /// Get a UTF-8 text body of any content type (e.g. XML). Returns error for >=400 status.
    pub async fn text_get(&self, url: &str) -> Result<String, HttpError> {
        let bytes = self.raw_request(Method::GET, url, None, "", "").await?;
        String::from_utf8(bytes.into()).map_err(|e| HttpError::DecodeError {
            decoding: format!("text from {}", redact_key(url)),
            source: Box::new(e),
        })
    }

    async fn json_json_request<I: serde::Serialize, O: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        payload: &I,
    ) -> Result<O, HttpError> {
        let body = encode_json(&method, url, payload)?;
        let bytes = self
            .raw_request(
                method,
                url,
                Some(body),
                "application/json",
                "application/json",
            )
            .await?;
        decode_json(url, bytes)
    }

    pub(crate) async fn raw_request(
        &self,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        content_type: &'static str,
        expected_content_type: &'static str,
    ) -> Result<bytes::Bytes, HttpError> {
        self.core
            .raw_request(method, url, body, content_type, expected_content_type)
            .await
    }
}

impl fmt::Debug for BaseApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseApiClient").finish_non_exhaustive()
    }
}

fn encode_json<I: serde::Serialize>(
    method: &Method,
    url: &str,
    payload: &I,
) -> Result<Bytes, HttpError> {
    serde_json::to_vec(payload)
        .map(Bytes::from)
        .map_err(|e| HttpError::EncodeError {
            encoding: format!("json payload for {method} {}", redact_key(url)),
            source: Box::new(e),
        })
}

fn decode_json<O: serde::de::DeserializeOwned>(url: &str, bytes: Bytes) -> Result<O, HttpError> {
    serde_json::from_slice(&bytes).map_err(|e| {
        let error_text = format_serde_error_from_bytes(bytes.into(), e);
        HttpError::DecodeError {
            decoding: format!("json from {}", redact_key(url)),
            source: error_text.into(),
        }
    })
}

fn format_serde_error_from_bytes(
    bytes: Vec<u8>,
    e: impl Into<format_serde_error::ErrorTypes>,
) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => format_serde_error::SerdeError::new(text, e).to_string(),
        Err(err) => err.to_string(),
    }
}
