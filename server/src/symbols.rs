//! Workspace symbol search

use rustc_hash::FxHashSet;
use std::sync::Arc;
use tower_lsp::lsp_types::{SymbolInformation, SymbolKind};

use crate::analysis::MemberKind;
use crate::store::DocumentStore;

pub struct SymbolsProvider;

impl SymbolsProvider {
    pub fn new() -> Self {
        Self
    }

    /// Module-level members across every entry whose name starts with the
    /// query, case-insensitively. The first occurrence of a name wins;
    /// later entries do not shadow it.
    pub async fn workspace_symbols(
        &self,
        store: &Arc<DocumentStore>,
        query: &str,
    ) -> Vec<SymbolInformation> {
        let needle = query.to_lowercase();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut symbols = Vec::new();

        for entry in store.entries() {
            let Some(analysis) = entry.analysis().await else {
                continue;
            };
            let container = analysis.module_name();
            for member in analysis.module_members() {
                if !member.name.to_lowercase().starts_with(&needle) {
                    continue;
                }
                if !seen.insert(member.name.clone()) {
                    continue;
                }
                #[allow(deprecated)]
                symbols.push(SymbolInformation {
                    name: member.name,
                    kind: symbol_kind(member.kind),
                    tags: None,
                    deprecated: None,
                    location: member.location,
                    container_name: Some(container.clone()),
                });
            }
        }
        symbols
    }
}

impl Default for SymbolsProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn symbol_kind(kind: MemberKind) -> SymbolKind {
    match kind {
        MemberKind::Module => SymbolKind::MODULE,
        MemberKind::Class => SymbolKind::CLASS,
        MemberKind::Function => SymbolKind::FUNCTION,
        MemberKind::Method => SymbolKind::METHOD,
        MemberKind::Field => SymbolKind::FIELD,
        MemberKind::Constant => SymbolKind::CONSTANT,
        MemberKind::Keyword | MemberKind::Variable | MemberKind::NamedArgument => {
            SymbolKind::VARIABLE
        }
        MemberKind::Unknown => SymbolKind::OBJECT,
    }
}
