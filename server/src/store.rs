//! Document store
//!
//! Concurrent URI-to-entry map. Entries are keyed by the *canonical* URI
//! (fragment stripped), because every part of a multi-cell document shares
//! one entry; pending changes are keyed by the full URI, because each part
//! orders its edits independently.

use dashmap::DashMap;
use std::sync::Arc;
use tower_lsp::lsp_types::Url;

use crate::changes::PendingChange;
use crate::diagnostics::ReportedDiagnostics;
use crate::document::{DocumentEntry, DocumentKind};
use crate::error::{Result, ServerError};

#[derive(Default)]
pub struct DocumentStore {
    entries: DashMap<Url, Arc<DocumentEntry>>,
    pending: DashMap<Url, Vec<PendingChange>>,
    reported: ReportedDiagnostics,
}

impl DocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Strip the fragment so all parts of a document share one key.
    pub fn canonical_uri(uri: &Url) -> Url {
        let mut canonical = uri.clone();
        canonical.set_fragment(None);
        canonical
    }

    /// Part index selected by the URI fragment. Absent, malformed, and
    /// non-integer fragments all mean part 0.
    pub fn get_part(uri: &Url) -> i32 {
        uri.fragment()
            .and_then(|f| f.parse::<i32>().ok())
            .unwrap_or(0)
    }

    /// Atomic insert-or-fetch. When two callers race, both observe the
    /// entry that won the insertion.
    pub fn get_or_add(&self, uri: &Url, kind: DocumentKind) -> Arc<DocumentEntry> {
        let canonical = Self::canonical_uri(uri);
        self.entries
            .entry(canonical.clone())
            .or_insert_with(|| DocumentEntry::new(canonical, kind))
            .clone()
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<DocumentEntry>> {
        self.entries
            .get(&Self::canonical_uri(uri))
            .map(|e| e.clone())
    }

    pub fn get_required(&self, uri: &Url) -> Result<Arc<DocumentEntry>> {
        self.get(uri)
            .ok_or_else(|| ServerError::UnknownDocument(uri.clone()))
    }

    /// Remove the entry together with its reported-diagnostics record and
    /// any changes still waiting on a predecessor.
    pub fn remove(&self, uri: &Url) -> Option<Arc<DocumentEntry>> {
        let canonical = Self::canonical_uri(uri);
        let removed = self.entries.remove(&canonical).map(|(_, e)| e);
        if removed.is_some() {
            self.reported.clear(&canonical);
            self.pending
                .retain(|key, _| Self::canonical_uri(key) != canonical);
        }
        removed
    }

    pub fn entries(&self) -> Vec<Arc<DocumentEntry>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reported(&self) -> &ReportedDiagnostics {
        &self.reported
    }

    // --- pending changes (fragment-sensitive) ---

    pub fn defer_change(&self, uri: &Url, change: PendingChange) {
        self.pending.entry(uri.clone()).or_default().push(change);
    }

    /// Drop pending changes older than `min_version`, then hand back the
    /// smallest remaining one. The rest stay queued.
    pub fn take_next_pending(&self, uri: &Url, min_version: i32) -> Option<PendingChange> {
        let mut list = self.pending.get_mut(uri)?;
        list.retain(|p| p.version >= min_version);
        if list.is_empty() {
            return None;
        }
        let (index, _) = list
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.version)?;
        Some(list.remove(index))
    }

    #[cfg(test)]
    pub fn pending_count(&self, uri: &Url) -> usize {
        self.pending.get(uri).map(|l| l.len()).unwrap_or(0)
    }
}
