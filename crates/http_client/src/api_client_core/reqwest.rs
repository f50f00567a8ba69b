// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;
use http::Method;
use tracing::debug;

use crate::error::HttpError;

/// TLS settings for one client.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Verify server certificates. The registry and the messaging endpoints
    /// are often run with grid CAs that aren't in the system store.
    pub verify_tls: bool,
    /// PEM certificate and PKCS#8 PEM key presented to the server.
    pub identity: Option<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct ApiClientCore {
    client: reqwest::Client, // cheaply cloneable (Arc<...> internally), see docs
}

impl ApiClientCore {
    pub fn new(options: &ClientOptions) -> Result<Self, HttpError> {
        let mut builder =
            reqwest::ClientBuilder::new().danger_accept_invalid_certs(!options.verify_tls);
        if let Some((cert, key)) = &options.identity {
            let identity = reqwest::Identity::from_pkcs8_pem(cert, key)
                .map_err(|e| HttpError::ClientError { source: Box::new(e) })?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| HttpError::ClientError { source: Box::new(e) })?;
        Ok(Self { client })
    }

    /// Send `body` (if any) to `url` with the given method and content type. When `expected_content_type` is non-empty the response type is verified against it.
    pub(crate) async fn raw_request(
        &self,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        content_type: &'static str,
        expected_content_type: &'static str,
    ) -> Result<bytes::Bytes, HttpError> {
        let mut rb = self.client.request(method.clone(), url);
        if let Some(b) = body {
            rb = rb
                .body(b)
                .header(reqwest::header::CONTENT_TYPE, content_type);
        }

        debug!("http_client: {method} {}", redact_key(url));

        let response = rb.send().await.map_err(|e| HttpError::RequestError {
            ctx: format!("requesting {}", redact_key(url)),
            status: None,
            retriable: true,
            source: Box::new(e),
        })?;

        let status = response.status();
        debug!("http_client: response from {}: {status}", redact_key(url));

        let content_type_err = check_content_type(response.headers(), expected_content_type);
        let bytes = response.bytes().await.map_err(|e| HttpError::RequestError {
            ctx: format!("reading body from {}", redact_key(url)),
            status: Some(status.as_u16()),
            retriable: true,
            source: Box::new(e),
        })?;

        let failure = if status.is_client_error() || status.is_server_error() {
            Some(format!("{status}: {}", String::from_utf8_lossy(&bytes)))
        } else {
            content_type_err
                .err()
                .map(|e| format!("{status}: {e}: {}", String::from_utf8_lossy(&bytes)))
        };

        match failure {
            None => Ok(bytes),
            Some(message) => Err(HttpError::RequestError {
                ctx: format!("requesting {}", redact_key(url)),
                status: Some(status.as_u16()),
                retriable: is_retriable(status.as_u16()),
                source: message.into(),
            }),
        }
    }
}

fn check_content_type(
    headers: &reqwest::header::HeaderMap,
    expected: &'static str,
) -> Result<(), String> {
    if expected.is_empty() {
        return Ok(());
    }
    let actual = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    // compare the essence only, "application/json; charset=utf-8" is fine
    let essence = actual.split(';').next().unwrap_or("").trim();
    if essence.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!("expected content type {expected}, got {actual:?}"))
    }
}

/// Whether a response with this status might succeed if sent again later.
pub(crate) fn is_retriable(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504)
}

/// Hides the value of a `key=` query parameter, which carries API tokens.
pub(crate) fn redact_key(url: &str) -> String {
    match url.split_once('?') {
        None => url.to_owned(),
        Some((path, query)) => {
            let query: Vec<String> = query
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some(("key", _)) => "key=<redacted>".to_owned(),
                    _ => pair.to_owned(),
                })
                .collect();
            format!("{path}?{}", query.join("&"))
        }
    }
}
