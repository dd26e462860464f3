//! Diagnostic publication
//!
//! The pipeline gates every publish on a monotonic per-(URI, part) version
//! guard; the sink itself is a dumb delivery surface with no retry and no
//! coalescing.

use async_trait::async_trait;
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tower_lsp::lsp_types::{Diagnostic, Url};
use tower_lsp::Client;

/// Destination for gated diagnostics. Production uses the LSP client; tests
/// substitute a recording sink.
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    async fn publish(&self, uri: Url, version: i32, diagnostics: Vec<Diagnostic>);
}

/// Publishes through `textDocument/publishDiagnostics`.
pub struct ClientSink {
    client: Client,
}

impl ClientSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiagnosticSink for ClientSink {
    async fn publish(&self, uri: Url, version: i32, diagnostics: Vec<Diagnostic>) {
        self.client
            .publish_diagnostics(uri, diagnostics, Some(version))
            .await;
    }
}

/// URI of one part: part 0 is the bare document, higher parts carry their
/// index in the fragment.
pub fn part_uri(canonical: &Url, part: i32) -> Url {
    if part == 0 {
        return canonical.clone();
    }
    let mut uri = canonical.clone();
    uri.set_fragment(Some(&part.to_string()));
    uri
}

/// Versions already published, per (URI, part).
///
/// Once version V is published for a part, nothing older than V gets out.
#[derive(Default)]
pub struct ReportedDiagnostics {
    records: DashMap<Url, FxHashMap<i32, i32>>,
}

impl ReportedDiagnostics {
    /// Record `version` for `(uri, part)` and report whether a publish is
    /// allowed. Holds the per-document record lock for the check-and-set.
    pub fn try_advance(&self, uri: &Url, part: i32, version: i32) -> bool {
        let mut record = self.records.entry(uri.clone()).or_default();
        match record.get(&part) {
            Some(&published) if published >= version => false,
            _ => {
                record.insert(part, version);
                true
            }
        }
    }

    /// Like `try_advance`, but permits re-publishing at the recorded
    /// version so an analysis pass can replace what the parse reported.
    /// Strictly older versions stay suppressed.
    pub fn try_refresh(&self, uri: &Url, part: i32, version: i32) -> bool {
        let mut record = self.records.entry(uri.clone()).or_default();
        match record.get(&part) {
            Some(&published) if published > version => false,
            _ => {
                record.insert(part, version);
                true
            }
        }
    }

    pub fn published_version(&self, uri: &Url, part: i32) -> Option<i32> {
        self.records.get(uri).and_then(|r| r.get(&part).copied())
    }

    pub fn clear(&self, uri: &Url) {
        self.records.remove(uri);
    }
}
