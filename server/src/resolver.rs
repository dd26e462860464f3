//! Read-request resolution
//!
//! Every synchronous read request (completion, hover, signature help,
//! references) starts the same way: resolve the entry, optionally wait for
//! the parse in flight, snapshot the tree and analysis, and check the
//! version pin. The snapshot stays consistent for the rest of the request
//! even while the document keeps moving underneath.

use std::sync::Arc;
use std::time::Duration;
use tower_lsp::lsp_types::Url;

use crate::analysis::{AnalysisEntry, ParseSnapshot};
use crate::document::DocumentEntry;
use crate::error::{Result, ServerError};
use crate::pipeline::ParseAnalyzePipeline;
use crate::store::DocumentStore;

/// Everything a read request needs, captured at one instant.
pub struct RequestSnapshot {
    pub entry: Arc<DocumentEntry>,
    pub part: i32,
    pub parse: Option<ParseSnapshot>,
    pub analysis: Option<Arc<dyn AnalysisEntry>>,
}

impl std::fmt::Debug for RequestSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSnapshot")
            .field("part", &self.part)
            .field("has_parse", &self.parse.is_some())
            .field("has_analysis", &self.analysis.is_some())
            .finish()
    }
}

impl RequestSnapshot {
    /// Version the snapshot's cookie reports for this part; 0 when no
    /// versioning is available.
    pub fn parse_version(&self) -> i32 {
        self.parse
            .as_ref()
            .and_then(|p| p.cookie.version_for(self.part))
            .unwrap_or(0)
    }
}

pub struct RequestResolver {
    store: Arc<DocumentStore>,
    pipeline: Arc<ParseAnalyzePipeline>,
}

impl RequestResolver {
    pub fn new(store: Arc<DocumentStore>, pipeline: Arc<ParseAnalyzePipeline>) -> Self {
        Self { store, pipeline }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Common preamble for read requests.
    ///
    /// The wait honors the configured completions timeout: negative waits
    /// indefinitely for in-flight parses, zero skips the wait, positive is
    /// best-effort for that many milliseconds. A version pin that doesn't
    /// match the snapshot fails `MismatchedVersion` with both values.
    pub async fn snapshot(
        &self,
        uri: &Url,
        expected_version: Option<i32>,
    ) -> Result<RequestSnapshot> {
        let entry = self.store.get_required(uri)?;
        if !entry.is_analyzable() {
            return Err(ServerError::UnsupportedDocumentType(uri.clone()));
        }
        let part = DocumentStore::get_part(uri);

        let timeout_ms = self.pipeline.flags().completions_timeout_ms;
        if timeout_ms < 0 {
            self.pipeline.wait_parse_drained(uri).await;
        } else if timeout_ms > 0 {
            let _ = tokio::time::timeout(
                Duration::from_millis(timeout_ms as u64),
                self.pipeline.wait_parse_drained(uri),
            )
            .await;
        }

        let parse = entry.current_parse().await;
        let analysis = entry.analysis().await;
        let snapshot = RequestSnapshot {
            entry,
            part,
            parse,
            analysis,
        };

        if let Some(expected) = expected_version {
            let actual = snapshot.parse_version();
            if expected != actual {
                return Err(ServerError::MismatchedVersion { expected, actual });
            }
        }
        Ok(snapshot)
    }
}
