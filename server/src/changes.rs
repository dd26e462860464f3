//! Incremental change reconciliation
//!
//! Clients may deliver `didChange` notifications out of order. The
//! reconciler applies a notification when its predecessor version has
//! landed and parks it otherwise; every application drains whatever queued
//! successors it unblocked. Pending changes are keyed by the full URI so
//! each part of a multi-cell document orders independently.

use std::sync::Arc;
use tower_lsp::lsp_types::{TextDocumentContentChangeEvent, Url};

use crate::document::DocumentEntry;
use crate::error::{Result, ServerError};
use crate::pipeline::ParseAnalyzePipeline;
use crate::queue::AnalysisPriority;
use crate::store::DocumentStore;

/// One change notification, already unwrapped from the transport.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    /// Target URI; the fragment selects the part.
    pub uri: Url,
    /// Version the buffer should be at after application. When absent, the
    /// change applies against the current version.
    pub version: Option<i32>,
    /// Edits to apply; `None` makes the notification a no-op.
    pub changes: Option<Vec<TextDocumentContentChangeEvent>>,
}

/// A change parked until its predecessor version arrives.
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// Declared target version; orders the pending list.
    pub version: i32,
    pub change: DocumentChange,
}

impl PendingChange {
    pub fn new(version: i32, uri: Url, changes: Option<Vec<TextDocumentContentChangeEvent>>) -> Self {
        Self {
            version,
            change: DocumentChange {
                uri,
                version: Some(version),
                changes,
            },
        }
    }
}

/// Knobs for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ChangeOptions {
    /// Suppress the post-apply parse-and-analyze enqueue.
    pub skip_analysis: bool,
    pub priority: AnalysisPriority,
}

impl Default for ChangeOptions {
    fn default() -> Self {
        Self {
            skip_analysis: false,
            priority: AnalysisPriority::High,
        }
    }
}

pub struct ChangeReconciler {
    store: Arc<DocumentStore>,
    pipeline: Arc<ParseAnalyzePipeline>,
}

impl ChangeReconciler {
    pub fn new(store: Arc<DocumentStore>, pipeline: Arc<ParseAnalyzePipeline>) -> Self {
        Self { store, pipeline }
    }

    /// Apply a change notification, then drain any pending successors it
    /// unblocked. Raises `UnknownDocument` when the target URI is not in
    /// the store or the addressed part has no open buffer.
    pub async fn apply(&self, change: DocumentChange, options: &ChangeOptions) -> Result<()> {
        let mut next = change;
        let mut applied: Option<Arc<DocumentEntry>> = None;

        loop {
            let uri = next.uri.clone();
            let entry = self.store.get_required(&uri)?;
            let part = DocumentStore::get_part(&uri);
            if !entry.is_open(part).await {
                return Err(ServerError::UnknownDocument(uri));
            }

            let Some(edits) = next.changes else {
                break;
            };

            let current = entry.version(part).await.max(0);
            let has_full_replacement = edits.iter().any(|c| c.range.is_none());
            // The client declares the version it expects the buffer to end
            // up at; its predecessor is what must already be in place.
            let (from, to) = match next.version {
                Some(to) => ((to - 1).max(0), to),
                None => (current, current + edits.len() as i32),
            };

            if from > current && !has_full_replacement {
                self.store.defer_change(
                    &uri,
                    PendingChange {
                        version: to,
                        change: DocumentChange {
                            uri: uri.clone(),
                            version: Some(to),
                            changes: Some(edits),
                        },
                    },
                );
                break;
            }

            entry
                .with_document(|doc| doc.update(part, from, to, &edits))
                .await?;
            applied = Some(entry);

            match self.store.take_next_pending(&uri, to) {
                Some(pending) => next = pending.change,
                None => break,
            }
        }

        if let Some(entry) = applied {
            if !options.skip_analysis {
                self.pipeline
                    .enqueue(entry, options.priority, true);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentKind;
    use crate::pipeline::test_support::noop_pipeline;
    use tower_lsp::lsp_types::{Position, Range};

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn ranged(l0: u32, c0: u32, l1: u32, c1: u32, text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range {
                start: Position {
                    line: l0,
                    character: c0,
                },
                end: Position {
                    line: l1,
                    character: c1,
                },
            }),
            range_length: None,
            text: text.to_string(),
        }
    }

    fn full(text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: text.to_string(),
        }
    }

    async fn open(store: &DocumentStore, u: &Url, version: i32, text: &str) -> Arc<DocumentEntry> {
        let entry = store.get_or_add(u, DocumentKind::Python);
        let part = DocumentStore::get_part(u);
        entry
            .with_document(|doc| doc.reset(part, version, Some(text)))
            .await;
        entry
    }

    fn change(u: &Url, version: i32, edits: Vec<TextDocumentContentChangeEvent>) -> DocumentChange {
        DocumentChange {
            uri: u.clone(),
            version: Some(version),
            changes: Some(edits),
        }
    }

    fn skip_analysis() -> ChangeOptions {
        ChangeOptions {
            skip_analysis: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_out_of_order_edits_converge() {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
        let u = uri("file:///a");
        let entry = open(&store, &u, 1, "x").await;

        // v3 deletes the first character; its predecessor is missing, so it
        // parks.
        reconciler
            .apply(change(&u, 3, vec![ranged(0, 0, 0, 1, "")]), &skip_analysis())
            .await
            .unwrap();
        assert_eq!(entry.document_snapshot().await.text(0).as_deref(), Some("x"));
        assert_eq!(store.pending_count(&u), 1);

        // v2 appends "y"; applying it drains the parked v3.
        reconciler
            .apply(change(&u, 2, vec![ranged(0, 1, 0, 1, "y")]), &skip_analysis())
            .await
            .unwrap();
        let doc = entry.document_snapshot().await;
        assert_eq!(doc.text(0).as_deref(), Some("y"));
        assert_eq!(doc.version(0), 3);
        assert_eq!(store.pending_count(&u), 0);
    }

    #[tokio::test]
    async fn test_any_permutation_converges() {
        // Versions [2, 3, 4] each append their digit; every arrival order
        // must produce the same text as in-order application.
        let orders: [[i32; 3]; 6] = [
            [2, 3, 4],
            [2, 4, 3],
            [3, 2, 4],
            [3, 4, 2],
            [4, 2, 3],
            [4, 3, 2],
        ];
        for order in orders {
            let store = DocumentStore::new();
            let pipeline = noop_pipeline(&store);
            let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
            let u = uri("file:///p.py");
            let entry = open(&store, &u, 1, "1").await;

            for v in order {
                let offset = (v - 1) as u32;
                reconciler
                    .apply(
                        change(&u, v, vec![ranged(0, offset, 0, offset, &v.to_string())]),
                        &skip_analysis(),
                    )
                    .await
                    .unwrap();
            }

            let doc = entry.document_snapshot().await;
            assert_eq!(doc.text(0).as_deref(), Some("1234"), "order {order:?}");
            assert_eq!(doc.version(0), 4);
        }
    }

    #[tokio::test]
    async fn test_full_replacement_applies_out_of_order() {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
        let u = uri("file:///a.py");
        let entry = open(&store, &u, 1, "old").await;

        // Version 9 with a whole-buffer edit never parks.
        reconciler
            .apply(change(&u, 9, vec![full("new")]), &skip_analysis())
            .await
            .unwrap();
        let doc = entry.document_snapshot().await;
        assert_eq!(doc.text(0).as_deref(), Some("new"));
        assert_eq!(doc.version(0), 9);
    }

    #[tokio::test]
    async fn test_missing_version_applies_against_current() {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
        let u = uri("file:///a.py");
        let entry = open(&store, &u, 4, "ab").await;

        reconciler
            .apply(
                DocumentChange {
                    uri: u.clone(),
                    version: None,
                    changes: Some(vec![ranged(0, 2, 0, 2, "c")]),
                },
                &skip_analysis(),
            )
            .await
            .unwrap();
        let doc = entry.document_snapshot().await;
        assert_eq!(doc.text(0).as_deref(), Some("abc"));
        // Version advances by the edit count.
        assert_eq!(doc.version(0), 5);
    }

    #[tokio::test]
    async fn test_null_edit_list_is_noop() {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
        let u = uri("file:///a.py");
        let entry = open(&store, &u, 1, "x").await;

        reconciler
            .apply(
                DocumentChange {
                    uri: u.clone(),
                    version: Some(2),
                    changes: None,
                },
                &skip_analysis(),
            )
            .await
            .unwrap();
        let doc = entry.document_snapshot().await;
        assert_eq!(doc.text(0).as_deref(), Some("x"));
        assert_eq!(doc.version(0), 1);
    }

    #[tokio::test]
    async fn test_unknown_uri_fails() {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
        let u = uri("file:///missing.py");

        let err = reconciler
            .apply(change(&u, 2, vec![full("x")]), &skip_analysis())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn test_change_after_close_fails() {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
        let u = uri("file:///a.py");
        let entry = open(&store, &u, 1, "x").await;

        entry.with_document(|doc| doc.reset(0, 0, None)).await;
        let err = reconciler
            .apply(change(&u, 2, vec![full("y")]), &skip_analysis())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownDocument(_)));

        // Re-opening makes the URI addressable again.
        open(&store, &u, 5, "fresh").await;
        reconciler
            .apply(change(&u, 6, vec![full("edited")]), &skip_analysis())
            .await
            .unwrap();
        assert_eq!(
            entry.document_snapshot().await.text(0).as_deref(),
            Some("edited")
        );
    }

    #[tokio::test]
    async fn test_parts_reconcile_independently() {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let reconciler = ChangeReconciler::new(Arc::clone(&store), pipeline);
        let part0 = uri("file:///n.ipynb#0");
        let part1 = uri("file:///n.ipynb#1");
        let entry = open(&store, &part0, 1, "a").await;
        open(&store, &part1, 1, "b").await;

        reconciler
            .apply(change(&part1, 2, vec![full("bb")]), &skip_analysis())
            .await
            .unwrap();

        let doc = entry.document_snapshot().await;
        assert_eq!(doc.text(0).as_deref(), Some("a"));
        assert_eq!(doc.text(1).as_deref(), Some("bb"));
        assert_eq!(doc.version(0), 1);
        assert_eq!(doc.version(1), 2);
    }
}
