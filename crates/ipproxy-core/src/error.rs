// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Unified error type for the IPP infrastructure proxy.

use thiserror::Error;

/// Top-level error type for all proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// DNS failure, connection refused, or a connect/round-trip timeout.
    /// Handled at the session-open boundary with Fibonacci back-off (spec §5, §7).
    #[error("connection to {uri} failed: {detail}")]
    Connect { uri: String, detail: String },

    /// An IPP response carried a status code >= client-error-bad-request.
    #[error("{operation} returned {status}")]
    IppStatus { operation: String, status: String },

    /// A required attribute was missing from a response where its absence
    /// is fatal for the current scope (registration, or a single job).
    #[error("malformed response: {0}")]
    MalformedAttributes(String),

    /// The local output device (IPP/IPPS or AppSocket) could not be reached
    /// or rejected the transfer. Always job-scoped; never fatal to the proxy.
    #[error("local device error: {0}")]
    Transport(String),

    /// A configured URI could not be parsed.
    #[error("invalid URI '{uri}': {detail}")]
    InvalidUri { uri: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ProxyError>;
