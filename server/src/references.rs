//! Find-references provider

use std::sync::Arc;
use tower_lsp::lsp_types::{Location, Position};

use crate::analysis::{AnalysisVariable, Analyzer, VariableKind};
use crate::resolver::RequestSnapshot;

pub struct ReferencesProvider;

impl ReferencesProvider {
    pub fn new() -> Self {
        Self
    }

    /// References for the symbol at `position`.
    ///
    /// An import name under the cursor contributes the imported module's
    /// declaration locations first; the analyzer's variable results follow.
    /// Results with kind `None` carry no location worth reporting and
    /// `Value` results denote computed values rather than source
    /// references, so both are dropped.
    pub fn references(
        &self,
        snapshot: &RequestSnapshot,
        analyzer: Option<&Arc<dyn Analyzer>>,
        position: Position,
        include_declaration: bool,
    ) -> Vec<Location> {
        let Some(parse) = snapshot.parse.as_ref() else {
            return Vec::new();
        };

        let mut variables: Vec<AnalysisVariable> = Vec::new();

        if let Some(analyzer) = analyzer {
            if let Some(module) = parse.tree.find_import_name(snapshot.part, position) {
                for location in analyzer.module_locations(&module) {
                    variables.push(AnalysisVariable {
                        kind: VariableKind::Definition,
                        location,
                    });
                }
            }
        }

        if let (Some(analysis), Some(expression)) = (
            snapshot.analysis.as_ref(),
            parse.tree.find_member_expression(snapshot.part, position),
        ) {
            variables.extend(analysis.variables_at(&expression, position));
        }

        variables.retain(|v| v.kind != VariableKind::None && v.kind != VariableKind::Value);
        if !include_declaration {
            variables.retain(|v| v.kind != VariableKind::Definition);
        }

        dedup_references(variables)
    }
}

impl Default for ReferencesProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// De-duplicate by (uri, start position). Among duplicates the widest range
/// wins, and at equal widths the lowest kind ordinal.
fn dedup_references(mut variables: Vec<AnalysisVariable>) -> Vec<Location> {
    variables.sort_by(|a, b| {
        let key_a = (
            a.location.uri.as_str(),
            a.location.range.start.line,
            a.location.range.start.character,
        );
        let key_b = (
            b.location.uri.as_str(),
            b.location.range.start.line,
            b.location.range.start.character,
        );
        let end_a = (a.location.range.end.line, a.location.range.end.character);
        let end_b = (b.location.range.end.line, b.location.range.end.character);
        key_a
            .cmp(&key_b)
            .then_with(|| end_b.cmp(&end_a))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    variables.dedup_by(|a, b| {
        a.location.uri == b.location.uri && a.location.range.start == b.location.range.start
    });
    variables.into_iter().map(|v| v.location).collect()
}
