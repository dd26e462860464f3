//! Collaborator contracts
//!
//! The core orchestrates a syntax parser and a semantic analyzer without
//! owning either. Both are reached through the narrow traits defined here;
//! concrete implementations come from an interpreter provider and are
//! injected at initialization.

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_lsp::lsp_types::{Diagnostic, Location, Position, Url};

use crate::document::Document;
use crate::error::Result;

/// Python language version, as far as the core cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PythonVersion {
    pub major: u8,
    pub minor: u8,
}

impl PythonVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether a directory must contain an `__init__` file to count as a
    /// package. Namespace packages lifted the requirement in 3.3.
    pub fn requires_init_files(&self) -> bool {
        *self < PythonVersion::new(3, 3)
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        Some(Self { major, minor })
    }
}

/// Opaque token identifying one parse generation of a document.
///
/// Carries the per-part version map observed when the parse was taken, so
/// downstream consumers can gate on versions without re-reading the buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseCookie {
    versions: FxHashMap<i32, i32>,
}

impl ParseCookie {
    pub fn new(versions: FxHashMap<i32, i32>) -> Self {
        Self { versions }
    }

    pub fn single(part: i32, version: i32) -> Self {
        let mut versions = FxHashMap::default();
        versions.insert(part, version);
        Self { versions }
    }

    pub fn version_for(&self, part: i32) -> Option<i32> {
        self.versions.get(&part).copied()
    }

    pub fn parts(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.versions.iter().map(|(&p, &v)| (p, v))
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// A (tree, cookie) pair captured when a parse completed.
#[derive(Clone)]
pub struct ParseSnapshot {
    pub tree: Arc<dyn SyntaxTree>,
    pub cookie: ParseCookie,
}

/// An enclosing call expression located under the cursor.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Expression text of the callee.
    pub callee: String,
    /// Zero-based index of the argument slot the cursor is in, if any.
    pub argument_index: Option<u32>,
    /// Names of keyword arguments already written out in the call.
    pub named_arguments: Vec<String>,
}

/// Read-only view over a parsed syntax tree.
///
/// The finders are tuned for the read requests: the member-expression
/// finder stops at the expression a completion should evaluate, the import
/// finder resolves only module names, and the call finder carries enough
/// context to pick an active parameter.
pub trait SyntaxTree: Send + Sync {
    /// Expression to the left of the cursor suitable for member evaluation.
    fn find_member_expression(&self, part: i32, position: Position) -> Option<String>;

    /// Innermost call expression containing the cursor.
    fn find_enclosing_call(&self, part: i32, position: Position) -> Option<CallContext>;

    /// Module name when the cursor sits on an import statement's name.
    fn find_import_name(&self, part: i32, position: Position) -> Option<String>;
}

/// The syntax parser collaborator.
///
/// Invoked by the parse queue with the live document; must tolerate the
/// buffer changing between submissions (it reads one consistent snapshot).
pub trait SyntaxParser: Send + Sync {
    fn parse(&self, uri: &Url, document: &Document) -> Result<ParseSnapshot>;
}

/// Semantic kind of a completion candidate. Deserializable because
/// extended completion requests can name a kind to filter by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemberKind {
    Keyword,
    Module,
    Class,
    Function,
    Method,
    Field,
    Variable,
    Constant,
    NamedArgument,
    Unknown,
}

/// One completion candidate produced by the analyzer.
#[derive(Debug, Clone)]
pub struct CompletionValue {
    pub name: String,
    /// Text to insert; defaults to `name` when empty.
    pub completion: String,
    pub documentation: Option<String>,
    pub kind: MemberKind,
}

impl CompletionValue {
    pub fn new(name: impl Into<String>, kind: MemberKind) -> Self {
        let name = name.into();
        Self {
            completion: name.clone(),
            name,
            documentation: None,
            kind,
        }
    }

    pub fn insert_text(&self) -> &str {
        if self.completion.is_empty() {
            &self.name
        } else {
            &self.completion
        }
    }
}

/// Kind of a variable reported for a references request.
///
/// Ordinal order matters: when de-duplicating, the lowest ordinal wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VariableKind {
    None,
    Definition,
    Reference,
    Value,
}

/// A source location the analyzer associates with an expression.
#[derive(Debug, Clone)]
pub struct AnalysisVariable {
    pub kind: VariableKind,
    pub location: Location,
}

/// An analyzed value, as rendered by hover.
#[derive(Debug, Clone, Default)]
pub struct AnalysisValue {
    /// One-line rendering, e.g. `int` or `module os`.
    pub description: Option<String>,
    /// Long-form documentation, potentially multi-line.
    pub documentation: Option<String>,
}

/// One parameter of an overload.
#[derive(Debug, Clone)]
pub struct ParameterResult {
    pub name: String,
    pub documentation: Option<String>,
    pub default_value: Option<String>,
}

/// One overload reported for signature help.
#[derive(Debug, Clone)]
pub struct OverloadResult {
    pub label: String,
    pub documentation: Option<String>,
    pub parameters: Vec<ParameterResult>,
}

/// A member declared at module level, for workspace symbol search.
#[derive(Debug, Clone)]
pub struct MemberResult {
    pub name: String,
    pub kind: MemberKind,
    pub location: Location,
}

/// Options forwarded to the analyzer's member queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberQuery {
    /// Intersect member sets when the expression has several possible
    /// values instead of taking their union.
    pub intersect_multiple: bool,
    /// Include every importable module in name results.
    pub include_all_modules: bool,
}

/// Per-module semantic results owned by the analyzer.
///
/// The core never inspects these beyond the query surface; entries stay
/// valid until the analyzer drops the module.
pub trait AnalysisEntry: Send + Sync {
    fn module_name(&self) -> String;

    /// Members reachable from evaluating `expression` at `position`.
    fn members_of(
        &self,
        expression: &str,
        position: Position,
        query: MemberQuery,
    ) -> Vec<CompletionValue>;

    /// Every name visible at `position`.
    fn names_at(&self, position: Position, query: MemberQuery) -> Vec<CompletionValue>;

    /// Variables (definitions and references) for `expression` at `position`.
    fn variables_at(&self, expression: &str, position: Position) -> Vec<AnalysisVariable>;

    /// Values of `expression` at `position`, for hover.
    fn values_at(&self, expression: &str, position: Position) -> Vec<AnalysisValue>;

    /// Overloads callable as `callee` at `position`.
    fn signatures_of(&self, callee: &str, position: Position) -> Vec<OverloadResult>;

    /// Members declared at module scope.
    fn module_members(&self) -> Vec<MemberResult>;
}

/// The semantic analyzer collaborator.
///
/// Externally synchronized; the core treats the reference as
/// shared-immutable between initialize and shutdown and holds modules by
/// URI key only (the analyzer owns all derived state). Analysis itself is
/// strictly asynchronous; everything else answers from computed state.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    fn add_module(
        &self,
        name: &str,
        path: Option<&Path>,
        uri: &Url,
        cookie: &ParseCookie,
    ) -> Arc<dyn AnalysisEntry>;

    fn add_module_alias(&self, name: &str, alias: &str);

    fn remove_module(&self, name: &str);

    /// URIs of entries importing `name`, optionally transitively.
    fn entries_importing(&self, name: &str, recursive: bool) -> Vec<Url>;

    fn search_paths(&self) -> Vec<PathBuf>;

    /// Run (or re-run) analysis for the module behind `uri`.
    async fn analyze(&self, uri: &Url) -> Result<()>;

    /// Current diagnostics for one part of the module behind `uri`.
    fn get_diagnostics(&self, uri: &Url, part: i32) -> Vec<Diagnostic>;

    /// Declaration locations of the module named `name`.
    fn module_locations(&self, name: &str) -> Vec<Location>;

    fn reload_modules(&self);
}
