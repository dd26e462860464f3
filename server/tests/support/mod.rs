//! Scripted parser and analyzer for orchestration tests.
//!
//! The parser understands just enough line structure to drive the tree
//! finders; the analyzer tracks modules, their `def` members, and their
//! `import` lines. Together they let the tests observe orchestration
//! behavior end to end without a real language front end.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, Location, Position, Range, Url,
};

use pyls::analysis::{
    AnalysisEntry, AnalysisValue, AnalysisVariable, Analyzer, CallContext, CompletionValue,
    MemberKind, MemberQuery, MemberResult, OverloadResult, ParseCookie, ParseSnapshot,
    SyntaxParser, SyntaxTree,
};
use pyls::diagnostics::DiagnosticSink;
use pyls::document::Document;
use pyls::error::Result;
use pyls::store::DocumentStore;

// --- parser ---

pub struct ToyTree {
    lines: FxHashMap<i32, Vec<String>>,
}

impl ToyTree {
    fn line(&self, part: i32, index: u32) -> Option<&str> {
        self.lines
            .get(&part)
            .and_then(|lines| lines.get(index as usize))
            .map(String::as_str)
    }
}

impl SyntaxTree for ToyTree {
    fn find_member_expression(&self, part: i32, position: Position) -> Option<String> {
        let line = self.line(part, position.line)?;
        let upto: String = line.chars().take(position.character as usize).collect();
        let token: String = upto
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let token = token.trim_end_matches('.');
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    fn find_enclosing_call(&self, part: i32, position: Position) -> Option<CallContext> {
        let line = self.line(part, position.line)?;
        let upto: String = line.chars().take(position.character as usize).collect();
        let open = upto.rfind('(')?;
        let callee: String = upto[..open]
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if callee.is_empty() {
            return None;
        }
        let inside = &upto[open + 1..];
        let named_arguments = inside
            .split(',')
            .filter_map(|arg| arg.split_once('=').map(|(n, _)| n.trim().to_string()))
            .collect();
        Some(CallContext {
            callee,
            argument_index: Some(inside.matches(',').count() as u32),
            named_arguments,
        })
    }

    fn find_import_name(&self, part: i32, position: Position) -> Option<String> {
        let line = self.line(part, position.line)?;
        let rest = line.strip_prefix("import ")?;
        Some(rest.trim().to_string())
    }
}

pub struct ToyParser;

impl SyntaxParser for ToyParser {
    fn parse(&self, uri: &Url, document: &Document) -> Result<ParseSnapshot> {
        let mut lines = FxHashMap::default();
        let mut versions = FxHashMap::default();

        let open_parts: Vec<i32> = document
            .parts()
            .into_iter()
            .filter(|&p| document.is_open(p))
            .collect();
        if open_parts.is_empty() {
            // Disk-backed: read through the URI.
            if let Ok(path) = uri.to_file_path() {
                if let Ok(text) = std::fs::read_to_string(path) {
                    lines.insert(0, text.lines().map(str::to_string).collect());
                    versions.insert(0, 0);
                }
            }
        } else {
            for part in open_parts {
                let text = document.text(part).unwrap_or_default();
                lines.insert(part, text.lines().map(str::to_string).collect());
                versions.insert(part, document.version(part));
            }
        }

        Ok(ParseSnapshot {
            tree: Arc::new(ToyTree { lines }),
            cookie: ParseCookie::new(versions),
        })
    }
}

// --- analyzer ---

#[derive(Default)]
struct ModuleState {
    uri: Option<Url>,
    members: Vec<String>,
    imports: Vec<String>,
}

#[derive(Default)]
struct Modules {
    by_name: FxHashMap<String, ModuleState>,
    names_by_uri: FxHashMap<Url, String>,
}

pub struct ToyAnalyzer {
    store: Arc<DocumentStore>,
    modules: Arc<Mutex<Modules>>,
}

impl ToyAnalyzer {
    pub fn new(store: Arc<DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            modules: Arc::new(Mutex::new(Modules::default())),
        })
    }

    async fn module_text(&self, uri: &Url) -> Option<String> {
        let entry = self.store.get(uri)?;
        let document = entry.document_snapshot().await;
        if let Some(text) = document.text(0) {
            return Some(text);
        }
        let path = uri.to_file_path().ok()?;
        std::fs::read_to_string(path).ok()
    }
}

#[async_trait]
impl Analyzer for ToyAnalyzer {
    fn add_module(
        &self,
        name: &str,
        _path: Option<&Path>,
        uri: &Url,
        _cookie: &ParseCookie,
    ) -> Arc<dyn AnalysisEntry> {
        let mut modules = self.modules.lock().unwrap();
        let state = modules.by_name.entry(name.to_string()).or_default();
        state.uri = Some(uri.clone());
        modules.names_by_uri.insert(uri.clone(), name.to_string());
        Arc::new(ToyModule {
            name: name.to_string(),
            modules: Arc::clone(&self.modules),
        })
    }

    fn add_module_alias(&self, name: &str, alias: &str) {
        let mut modules = self.modules.lock().unwrap();
        if let Some(uri) = modules
            .by_name
            .get(name)
            .and_then(|state| state.uri.clone())
        {
            let state = modules.by_name.entry(alias.to_string()).or_default();
            state.uri = Some(uri);
        }
    }

    fn remove_module(&self, name: &str) {
        let mut modules = self.modules.lock().unwrap();
        if let Some(state) = modules.by_name.remove(name) {
            if let Some(uri) = state.uri {
                modules.names_by_uri.remove(&uri);
            }
        }
    }

    fn entries_importing(&self, name: &str, _recursive: bool) -> Vec<Url> {
        let modules = self.modules.lock().unwrap();
        modules
            .by_name
            .values()
            .filter(|state| state.imports.iter().any(|i| i == name))
            .filter_map(|state| state.uri.clone())
            .collect()
    }

    fn search_paths(&self) -> Vec<std::path::PathBuf> {
        Vec::new()
    }

    async fn analyze(&self, uri: &Url) -> Result<()> {
        let text = self.module_text(uri).await.unwrap_or_default();
        let mut members = Vec::new();
        let mut imports = Vec::new();
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("def ") {
                let name: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if !name.is_empty() {
                    members.push(name);
                }
            } else if let Some(rest) = line.strip_prefix("import ") {
                imports.push(rest.trim().to_string());
            }
        }

        let mut modules = self.modules.lock().unwrap();
        let Some(name) = modules.names_by_uri.get(uri).cloned() else {
            return Ok(());
        };
        let state = modules.by_name.entry(name).or_default();
        state.members = members;
        state.imports = imports;
        Ok(())
    }

    fn get_diagnostics(&self, uri: &Url, _part: i32) -> Vec<Diagnostic> {
        let modules = self.modules.lock().unwrap();
        let Some(name) = modules.names_by_uri.get(uri) else {
            return Vec::new();
        };
        let Some(state) = modules.by_name.get(name) else {
            return Vec::new();
        };
        state
            .imports
            .iter()
            .filter(|import| !modules.by_name.contains_key(import.as_str()))
            .map(|import| Diagnostic {
                range: Range::default(),
                severity: Some(DiagnosticSeverity::ERROR),
                message: format!("unresolved import: {import}"),
                ..Default::default()
            })
            .collect()
    }

    fn module_locations(&self, name: &str) -> Vec<Location> {
        let modules = self.modules.lock().unwrap();
        modules
            .by_name
            .get(name)
            .and_then(|state| state.uri.clone())
            .map(|uri| Location {
                uri,
                range: Range::default(),
            })
            .into_iter()
            .collect()
    }

    fn reload_modules(&self) {}
}

struct ToyModule {
    name: String,
    modules: Arc<Mutex<Modules>>,
}

impl AnalysisEntry for ToyModule {
    fn module_name(&self) -> String {
        self.name.clone()
    }

    fn members_of(
        &self,
        expression: &str,
        _position: Position,
        _query: MemberQuery,
    ) -> Vec<CompletionValue> {
        let modules = self.modules.lock().unwrap();
        modules
            .by_name
            .get(expression)
            .map(|state| {
                state
                    .members
                    .iter()
                    .map(|m| CompletionValue::new(m.clone(), MemberKind::Function))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn names_at(&self, _position: Position, _query: MemberQuery) -> Vec<CompletionValue> {
        let modules = self.modules.lock().unwrap();
        modules
            .by_name
            .get(&self.name)
            .map(|state| {
                state
                    .members
                    .iter()
                    .map(|m| CompletionValue::new(m.clone(), MemberKind::Function))
                    .chain(
                        state
                            .imports
                            .iter()
                            .map(|i| CompletionValue::new(i.clone(), MemberKind::Module)),
                    )
                    .collect()
            })
            .unwrap_or_default()
    }

    fn variables_at(&self, _expression: &str, _position: Position) -> Vec<AnalysisVariable> {
        Vec::new()
    }

    fn values_at(&self, expression: &str, _position: Position) -> Vec<AnalysisValue> {
        let modules = self.modules.lock().unwrap();
        if modules.by_name.contains_key(expression) {
            vec![AnalysisValue {
                description: Some(format!("module {expression}")),
                documentation: None,
            }]
        } else {
            Vec::new()
        }
    }

    fn signatures_of(&self, _callee: &str, _position: Position) -> Vec<OverloadResult> {
        Vec::new()
    }

    fn module_members(&self) -> Vec<MemberResult> {
        let modules = self.modules.lock().unwrap();
        let Some(state) = modules.by_name.get(&self.name) else {
            return Vec::new();
        };
        let Some(uri) = state.uri.clone() else {
            return Vec::new();
        };
        state
            .members
            .iter()
            .map(|m| MemberResult {
                name: m.clone(),
                kind: MemberKind::Function,
                location: Location {
                    uri: uri.clone(),
                    range: Range::default(),
                },
            })
            .collect()
    }
}

// --- diagnostics sink ---

/// Records every publish for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(Url, i32, usize)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<(Url, i32, usize)> {
        self.published.lock().unwrap().clone()
    }

    pub fn versions_for(&self, uri: &Url) -> Vec<i32> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _, _)| u == uri)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

#[async_trait]
impl DiagnosticSink for RecordingSink {
    async fn publish(&self, uri: Url, version: i32, diagnostics: Vec<Diagnostic>) {
        self.published
            .lock()
            .unwrap()
            .push((uri, version, diagnostics.len()));
    }
}
