// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("while {ctx}: {status_wrap}, {retriable_wrap}: {source}", status_wrap=StatusWrapper(*status), retriable_wrap=RetriableWrapper(*retriable))]
    RequestError {
        ctx: String,
        /// The HTTP status code of the response, or None if no response arrived.
        status: Option<u16>,
        retriable: bool,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("decoding {decoding}: {source}")]
    DecodeError {
        decoding: String,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("encoding {encoding}: {source}")]
    EncodeError {
        encoding: String,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("building client: {source}")]
    ClientError {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl HttpError {
    pub fn is_retriable(&self) -> bool {
        match self {
            HttpError::RequestError { retriable, .. } => *retriable,
            HttpError::DecodeError { .. }
            | HttpError::EncodeError { .. }
            | HttpError::ClientError { .. } => false,
        }
    }

    /// Status of the response that caused this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::RequestError { status, .. } => *status,
            _ => None,
        }
    }

    /// Shorthand for `self.status() == Some(409)`: the resource already exists.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

struct StatusWrapper(Option<u16>);

impl std::fmt::Display for StatusWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            None => f.write_str("no status"),
            Some(status) => write!(f, "status: {status}"),
        }
    }
}

struct RetriableWrapper(bool);

impl std::fmt::Display for RetriableWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            false => f.write_str("not retriable"),
            true => f.write_str("retriable"),
        }
    }
}
