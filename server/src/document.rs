//! Document buffers and entries
//!
//! A document is a set of independently versioned *parts* (cells of a
//! notebook share one URI and select a part via the `#N` fragment; plain
//! files only ever use part 0). Each part holds its text in a rope for
//! cheap incremental edits. A `DocumentEntry` is the server's handle for
//! one file under management.

use ropey::Rope;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent, Url};

use crate::analysis::{AnalysisEntry, ParseSnapshot};
use crate::error::{Result, ServerError};

/// Version sentinel for a part that is backed by disk only.
pub const DISK_VERSION: i32 = -1;

#[derive(Debug, Clone, Default)]
struct PartBuffer {
    /// `None` when the part has no in-memory buffer.
    rope: Option<Rope>,
    version: i32,
}

/// In-memory buffer state of a document, per part.
#[derive(Debug, Clone, Default)]
pub struct Document {
    parts: FxHashMap<i32, PartBuffer>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of a part. `DISK_VERSION` when the part is not open.
    pub fn version(&self, part: i32) -> i32 {
        match self.parts.get(&part) {
            Some(buffer) if buffer.rope.is_some() => buffer.version,
            _ => DISK_VERSION,
        }
    }

    pub fn is_open(&self, part: i32) -> bool {
        self.version(part) != DISK_VERSION
    }

    /// Part indices in ascending order.
    pub fn parts(&self) -> Vec<i32> {
        let mut parts: Vec<i32> = self.parts.keys().copied().collect();
        parts.sort_unstable();
        parts
    }

    pub fn text(&self, part: i32) -> Option<String> {
        self.parts
            .get(&part)
            .and_then(|b| b.rope.as_ref())
            .map(Rope::to_string)
    }

    /// Reset a part. `None` text drops the buffer back to disk-backed and
    /// sets the version sentinel; otherwise the buffer is replaced wholesale.
    pub fn reset(&mut self, part: i32, version: i32, text: Option<&str>) {
        let buffer = self.parts.entry(part).or_default();
        match text {
            Some(text) => {
                buffer.rope = Some(Rope::from_str(text));
                buffer.version = version;
            }
            None => {
                buffer.rope = None;
                buffer.version = DISK_VERSION;
            }
        }
    }

    /// Apply a batch of edits to one part, advancing its version to
    /// `to_version`. The version never moves backwards; a stale batch still
    /// applies its edits but leaves the newer version in place.
    pub fn update(
        &mut self,
        part: i32,
        _from_version: i32,
        to_version: i32,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<()> {
        let buffer = self.parts.get_mut(&part).ok_or_else(|| {
            ServerError::Internal(format!("update against unknown part {part}"))
        })?;
        let rope = buffer.rope.as_mut().ok_or_else(|| {
            ServerError::Internal(format!("update against closed part {part}"))
        })?;

        for change in changes {
            match change.range {
                Some(range) => {
                    let start = position_to_char(rope, range.start);
                    let end = position_to_char(rope, range.end).max(start);
                    rope.remove(start..end);
                    rope.insert(start, &change.text);
                }
                None => {
                    *rope = Rope::from_str(&change.text);
                }
            }
        }

        buffer.version = buffer.version.max(to_version);
        Ok(())
    }
}

/// Clamp an LSP position to a char index in the rope.
fn position_to_char(rope: &Rope, position: Position) -> usize {
    let line = (position.line as usize).min(rope.len_lines().saturating_sub(1));
    let line_start = rope.line_to_char(line);
    let line_len = rope.line(line).len_chars();
    line_start + (position.character as usize).min(line_len)
}

/// Capability classification of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Analyzable source; may be enqueued for parse and analysis.
    Python,
    /// Tracked but never analyzed; read requests fail with
    /// `UnsupportedDocumentType`.
    PlainText,
}

/// Module identity of an entry: the primary name plus any aliases the
/// search paths make reachable.
#[derive(Debug, Clone, Default)]
pub struct ModuleInfo {
    pub name: Option<String>,
    pub aliases: Vec<String>,
}

/// The server's handle for a file under management.
///
/// Owned exclusively by the `DocumentStore`; parse and analysis workers
/// hold shared references while running.
pub struct DocumentEntry {
    uri: Url,
    path: Option<PathBuf>,
    kind: DocumentKind,
    document: RwLock<Document>,
    module: RwLock<ModuleInfo>,
    parse: RwLock<Option<ParseSnapshot>>,
    analysis: RwLock<Option<Arc<dyn AnalysisEntry>>>,
}

impl DocumentEntry {
    pub fn new(uri: Url, kind: DocumentKind) -> Arc<Self> {
        let path = uri.to_file_path().ok();
        Arc::new(Self {
            uri,
            path,
            kind,
            document: RwLock::new(Document::new()),
            module: RwLock::new(ModuleInfo::default()),
            parse: RwLock::new(None),
            analysis: RwLock::new(None),
        })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn is_analyzable(&self) -> bool {
        matches!(self.kind, DocumentKind::Python)
    }

    pub async fn version(&self, part: i32) -> i32 {
        self.document.read().await.version(part)
    }

    pub async fn is_open(&self, part: i32) -> bool {
        self.document.read().await.is_open(part)
    }

    /// Whether any part has an in-memory buffer.
    pub async fn is_in_memory(&self) -> bool {
        let document = self.document.read().await;
        document.parts().iter().any(|&p| document.is_open(p))
    }

    /// Cheap clone of the buffer state for parsing.
    pub async fn document_snapshot(&self) -> Document {
        self.document.read().await.clone()
    }

    pub async fn with_document<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        f(&mut *self.document.write().await)
    }

    pub async fn module_info(&self) -> ModuleInfo {
        self.module.read().await.clone()
    }

    pub async fn set_module_info(&self, info: ModuleInfo) {
        *self.module.write().await = info;
    }

    pub async fn current_parse(&self) -> Option<ParseSnapshot> {
        self.parse.read().await.clone()
    }

    pub async fn set_parse(&self, snapshot: ParseSnapshot) {
        *self.parse.write().await = Some(snapshot);
    }

    pub async fn analysis(&self) -> Option<Arc<dyn AnalysisEntry>> {
        self.analysis.read().await.clone()
    }

    pub async fn set_analysis(&self, entry: Arc<dyn AnalysisEntry>) {
        *self.analysis.write().await = Some(entry);
    }
}

impl std::fmt::Debug for DocumentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentEntry")
            .field("uri", &self.uri.as_str())
            .field("kind", &self.kind)
            .finish()
    }
}
