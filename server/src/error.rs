//! Server error taxonomy
//!
//! Every failure a request handler can report maps to a stable JSON-RPC
//! error code so clients can pattern-match on it across releases.

use thiserror::Error;
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::Url;

/// Stable JSON-RPC error codes (server-reserved range).
pub mod codes {
    pub const UNKNOWN_DOCUMENT: i64 = -32010;
    pub const UNSUPPORTED_DOCUMENT_TYPE: i64 = -32011;
    pub const MISMATCHED_VERSION: i64 = -32012;
    pub const BAD_SOURCE: i64 = -32013;
    pub const CANCELLED: i64 = -32014;
    pub const INTERNAL: i64 = -32015;
}

/// Errors raised by the document store, pipeline, and request handlers.
#[derive(Error, Debug, Clone)]
pub enum ServerError {
    /// Operation against a URI that is not in the store.
    #[error("unknown document: {0}")]
    UnknownDocument(Url),

    /// Read request against an entry that cannot be analyzed.
    #[error("unsupported document type: {0}")]
    UnsupportedDocumentType(Url),

    /// The client pinned a version and the current parse disagrees.
    #[error("mismatched version: expected {expected}, actual {actual}")]
    MismatchedVersion { expected: i32, actual: i32 },

    /// The parser rejected the input. Swallowed internally; surfaces to the
    /// client only as absent or stale analysis.
    #[error("source rejected by parser")]
    BadSource,

    /// Shutdown or timeout interrupted the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Anything unexpected. Logged; the handler degrades to an empty result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn code(&self) -> i64 {
        match self {
            ServerError::UnknownDocument(_) => codes::UNKNOWN_DOCUMENT,
            ServerError::UnsupportedDocumentType(_) => codes::UNSUPPORTED_DOCUMENT_TYPE,
            ServerError::MismatchedVersion { .. } => codes::MISMATCHED_VERSION,
            ServerError::BadSource => codes::BAD_SOURCE,
            ServerError::Cancelled => codes::CANCELLED,
            ServerError::Internal(_) => codes::INTERNAL,
        }
    }

    /// Whether a request handler should surface this error to the client
    /// rather than degrade to an empty result.
    pub fn is_request_fault(&self) -> bool {
        matches!(
            self,
            ServerError::UnknownDocument(_)
                | ServerError::UnsupportedDocumentType(_)
                | ServerError::MismatchedVersion { .. }
        )
    }
}

impl From<ServerError> for jsonrpc::Error {
    fn from(err: ServerError) -> Self {
        let mut out = jsonrpc::Error::new(jsonrpc::ErrorCode::ServerError(err.code()));
        out.message = err.to_string().into();
        if let ServerError::MismatchedVersion { expected, actual } = err {
            out.data = Some(serde_json::json!({ "expected": expected, "actual": actual }));
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes() {
        let uri = Url::parse("file:///a.py").unwrap();
        assert_eq!(
            ServerError::UnknownDocument(uri.clone()).code(),
            codes::UNKNOWN_DOCUMENT
        );
        assert_eq!(
            ServerError::MismatchedVersion {
                expected: 7,
                actual: 6
            }
            .code(),
            codes::MISMATCHED_VERSION
        );
        assert!(ServerError::UnknownDocument(uri).is_request_fault());
        assert!(!ServerError::BadSource.is_request_fault());
    }

    #[test]
    fn test_mismatch_carries_both_versions() {
        let rpc: jsonrpc::Error = ServerError::MismatchedVersion {
            expected: 7,
            actual: 6,
        }
        .into();
        let data = rpc.data.unwrap();
        assert_eq!(data["expected"], 7);
        assert_eq!(data["actual"], 6);
    }
}
