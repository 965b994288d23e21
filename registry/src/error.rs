//! Registry error types.
//!
//! Only configuration problems are reported as [`RegistryError`] by the public
//! facade. Network and resolution failures are returned as data (see
//! [`ToolCallResult`](crate::ToolCallResult) and [`ServerStatus`](crate::ServerStatus)).

use std::time::Duration;

use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of a single failed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote end could not be reached (refused, DNS, reset during connect).
    #[error("connection refused: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    /// The response body could not be read or decoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}
