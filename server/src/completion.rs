//! Code completion provider
//!
//! Coordinates the tree finders and the analyzer's member queries into one
//! completion list; it never walks AST nodes itself.

use rustc_hash::FxHashSet;
use serde::Deserialize;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Documentation, Position,
};

use crate::analysis::{CompletionValue, MemberKind, MemberQuery};
use crate::resolver::RequestSnapshot;

/// Statement-position keywords offered when no member expression applies.
const STATEMENT_KEYWORDS: &[&str] = &[
    "assert", "async", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "global", "if", "import", "nonlocal", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Keywords valid inside expressions.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "and", "await", "in", "is", "lambda", "not", "or", "False", "None", "True",
];

/// Context options for one completion request. Deserializable so extended
/// requests can carry them on the wire; only the keyword switches default
/// on, everything else is opt-in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompletionOptionsSet {
    pub intersect_multiple_results: bool,
    pub statement_keywords: bool,
    pub expression_keywords: bool,
    pub include_all_modules: bool,
    pub include_argument_names: bool,
    pub filter_kind: Option<MemberKind>,
}

impl Default for CompletionOptionsSet {
    fn default() -> Self {
        Self {
            intersect_multiple_results: false,
            statement_keywords: true,
            expression_keywords: true,
            include_all_modules: false,
            include_argument_names: false,
            filter_kind: None,
        }
    }
}

pub struct CompletionProvider;

impl CompletionProvider {
    pub fn new() -> Self {
        Self
    }

    /// Completions at `position`. An explicit expression bypasses tree
    /// walking entirely; otherwise the member-expression finder decides
    /// between member completion and all-names completion.
    pub fn complete(
        &self,
        snapshot: &RequestSnapshot,
        position: Position,
        explicit_expression: Option<&str>,
        options: &CompletionOptionsSet,
    ) -> Vec<CompletionItem> {
        let Some(analysis) = snapshot.analysis.as_ref() else {
            return Vec::new();
        };
        let query = MemberQuery {
            intersect_multiple: options.intersect_multiple_results,
            include_all_modules: options.include_all_modules,
        };

        let member_expression = match explicit_expression {
            Some(expr) if !expr.is_empty() => Some(expr.to_string()),
            _ => snapshot
                .parse
                .as_ref()
                .and_then(|p| p.tree.find_member_expression(snapshot.part, position)),
        };

        let mut values = match member_expression {
            Some(expr) => analysis.members_of(&expr, position, query),
            None => {
                let mut names = analysis.names_at(position, query);
                if options.statement_keywords {
                    names.extend(keyword_values(STATEMENT_KEYWORDS));
                }
                if options.expression_keywords {
                    names.extend(keyword_values(EXPRESSION_KEYWORDS));
                }
                names
            }
        };

        if options.include_argument_names {
            values.extend(self.argument_name_values(snapshot, position));
        }

        if let Some(kind) = options.filter_kind {
            values.retain(|v| v.kind == kind);
        }

        values.into_iter().map(to_completion_item).collect()
    }

    /// Named-argument suggestions: the parameter names of every overload of
    /// the enclosing call, minus arguments already written out, rendered
    /// `name=`.
    fn argument_name_values(
        &self,
        snapshot: &RequestSnapshot,
        position: Position,
    ) -> Vec<CompletionValue> {
        let Some(parse) = snapshot.parse.as_ref() else {
            return Vec::new();
        };
        let Some(analysis) = snapshot.analysis.as_ref() else {
            return Vec::new();
        };
        let Some(call) = parse.tree.find_enclosing_call(snapshot.part, position) else {
            return Vec::new();
        };
        if call.argument_index.is_none() {
            return Vec::new();
        }

        let present: FxHashSet<&str> = call.named_arguments.iter().map(String::as_str).collect();
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for overload in analysis.signatures_of(&call.callee, position) {
            for parameter in overload.parameters {
                if present.contains(parameter.name.as_str()) {
                    continue;
                }
                if !seen.insert(parameter.name.clone()) {
                    continue;
                }
                let mut value =
                    CompletionValue::new(format!("{}=", parameter.name), MemberKind::NamedArgument);
                value.documentation = parameter.documentation;
                out.push(value);
            }
        }
        out
    }
}

impl Default for CompletionProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn keyword_values(keywords: &[&str]) -> Vec<CompletionValue> {
    keywords
        .iter()
        .map(|k| CompletionValue::new(*k, MemberKind::Keyword))
        .collect()
}

fn to_completion_item(value: CompletionValue) -> CompletionItem {
    CompletionItem {
        label: value.name.clone(),
        kind: Some(completion_kind(value.kind)),
        insert_text: Some(value.insert_text().to_string()),
        documentation: value.documentation.clone().map(Documentation::String),
        ..Default::default()
    }
}

fn completion_kind(kind: MemberKind) -> CompletionItemKind {
    match kind {
        MemberKind::Keyword => CompletionItemKind::KEYWORD,
        MemberKind::Module => CompletionItemKind::MODULE,
        MemberKind::Class => CompletionItemKind::CLASS,
        MemberKind::Function => CompletionItemKind::FUNCTION,
        MemberKind::Method => CompletionItemKind::METHOD,
        MemberKind::Field => CompletionItemKind::FIELD,
        MemberKind::Variable | MemberKind::NamedArgument => CompletionItemKind::VARIABLE,
        MemberKind::Constant => CompletionItemKind::CONSTANT,
        MemberKind::Unknown => CompletionItemKind::TEXT,
    }
}
