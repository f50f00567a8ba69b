// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[path = "reqwest.rs"]
pub mod implementation;

use bytes::Bytes;
use http::Method;

pub use self::implementation::{ApiClientCore as ApiClientCoreImpl, ClientOptions};
use crate::error::HttpError;

#[async_trait::async_trait]
pub trait ApiClientCore {
    /// Sends one request. Implementations return an error carrying the status
    /// for any response >= 400.
    async fn raw_request(
        &self,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        content_type: &'static str,
        expected_content_type: &'static str,
    ) -> Result<bytes::Bytes, HttpError>;
}

#[async_trait::async_trait]
impl ApiClientCore for ApiClientCoreImpl {
    async fn raw_request(
        &self,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        content_type: &'static str,
        expected_content_type: &'static str,
    ) -> Result<bytes::Bytes, HttpError> {
        self.raw_request(method, url, body, content_type, expected_content_type)
            .await
    }
}

pub mod test_utils {
    use super::*;

    use std::pin::Pin;

    /// Everything a mocked core was asked to send.
    #[derive(Debug, Clone)]
    pub struct MockRequest {
        pub method: Method,
        pub url: String,
        pub body: Option<Bytes>,
        pub content_type: String,
        pub expected_content_type: String,
    }

    impl MockRequest {
        /// The request body as JSON, or `Null` when there is none.
        pub fn json_body(&self) -> serde_json::Value {
            self.body
                .as_ref()
                .and_then(|b| serde_json::from_slice(b).ok())
                .unwrap_or(serde_json::Value::Null)
        }
    }

    type ResultFuture = dyn futures::Future<Output = Result<bytes::Bytes, HttpError>> + Send;
    type Responder = dyn (Fn(MockRequest) -> Pin<Box<ResultFuture>>) + Send + Sync;

    /// Mock `ApiClientCore` that holds a closure that can respond to requests with fake responses, or errors.
    ///
    /// ```rust
    /// use futures::FutureExt;
    ///
    /// use http_client::{BaseApiClient, HttpError};
    /// use http_client::test_utils::{ApiClientCoreMock, MockRequest};
    ///
    /// let mock = ApiClientCoreMock::from(|request: MockRequest| {
    ///     // note the `async { ... }.boxed()`!
    ///     async move {
    ///         if request.url.contains("exists") {
    ///             Err(HttpError::RequestError {
    ///                 ctx: request.url,
    ///                 status: Some(409),
    ///                 retriable: false,
    ///                 source: "already exists".into(),
    ///             })
    ///         } else {
    ///             Ok(r#"{"uuid": "1234"}"#.as_bytes().into())
    ///         }
    ///     }.boxed()
    /// });
    /// let client = BaseApiClient::from(mock);
    ///
    /// let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    /// rt.block_on(async {
    ///     client.json_json_post::<_, serde_json::Value>("example.com/users/new", &"body").await.unwrap();
    ///     let err = client.json_json_post::<_, serde_json::Value>("example.com/users/exists", &"body").await.unwrap_err();
    ///     assert!(err.is_conflict());
    /// });
    /// ```
    pub struct ApiClientCoreMock {
        responder: Box<Responder>,
    }

    #[async_trait::async_trait]
    impl ApiClientCore for ApiClientCoreMock {
        async fn raw_request(
            &self,
            method: Method,
            url: &str,
            body: Option<Bytes>,
            content_type: &'static str,
                expected_content_type: &'static str,
        ) -> Result<bytes::Bytes, HttpError> {
            (self.responder)(MockRequest {
                method,
                url: url.into(),
                body,
                content_type: content_type.into(),
                expected_content_type: expected_content_type.into(),
            })
            .await
        }
    }

    impl<F: Fn(MockRequest) -> Pin<Box<ResultFuture>> + Send + Sync + 'static> From<F>
        for ApiClientCoreMock
    {
        fn from(value: F) -> Self {
            Self {
                responder: Box::new(value),
            }
        }
    }

    /// Builds the error a real core returns for a response with `status`.
    pub fn status_error(url: &str, status: u16, body: &str) -> HttpError {
        HttpError::RequestError {
            ctx: format!("requesting {url}"),
            status: Some(status),
            retriable: super::implementation::is_retriable(status),
            source: format!("{status}: {body}").into(),
        }
    }
}
