//! Hover provider
//!
//! Renders analyzed values as plain text. The output is clamped hard:
//! editors render hovers in small popups and a pathological repr must not
//! flood them.

use tower_lsp::lsp_types::{Hover, HoverContents, MarkedString, Position};

use crate::analysis::AnalysisValue;
use crate::resolver::RequestSnapshot;

/// Label budget for the hovered expression itself.
const MAX_LABEL_CHARS: usize = 4093;
/// Whole-hover caps.
const MAX_LINES: usize = 30;
const MAX_LINE_CHARS: usize = 200;

pub struct HoverProvider;

impl HoverProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn hover(&self, snapshot: &RequestSnapshot, position: Position) -> Option<Hover> {
        let parse = snapshot.parse.as_ref()?;
        let analysis = snapshot.analysis.as_ref()?;
        let expression = parse.tree.find_member_expression(snapshot.part, position)?;

        let values = analysis.values_at(&expression, position);
        let text = render_hover(&expression, &values);
        Some(Hover {
            contents: HoverContents::Scalar(MarkedString::String(text)),
            range: None,
        })
    }
}

impl Default for HoverProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Text rendering of hover values.
///
/// Short descriptions join with `", "` unless any is multi-line, in which
/// case they stack. A single value with long documentation shows the
/// documentation instead. No values at all renders `<unknown type>`.
pub fn render_hover(expression: &str, values: &[AnalysisValue]) -> String {
    let label = truncate_chars(expression, MAX_LABEL_CHARS);

    let body = if values.is_empty() {
        "<unknown type>".to_string()
    } else if values.len() == 1 && has_text(values[0].documentation.as_deref()) {
        values[0].documentation.clone().unwrap_or_default()
    } else {
        let descriptions: Vec<&str> = values
            .iter()
            .filter_map(|v| v.description.as_deref())
            .filter(|d| !d.trim().is_empty())
            .collect();
        if descriptions.is_empty() {
            "<unknown type>".to_string()
        } else if descriptions.iter().any(|d| d.contains('\n')) {
            descriptions.join("\n")
        } else {
            descriptions.join(", ")
        }
    };

    clamp_text(&format!("{label}: {body}"))
}

fn has_text(text: Option<&str>) -> bool {
    text.is_some_and(|t| !t.trim().is_empty())
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

/// Collapse runs of blank lines, cap line length and line count, and mark
/// any truncation with a trailing ellipsis.
fn clamp_text(text: &str) -> String {
    let mut lines = Vec::new();
    let mut truncated = false;
    let mut previous_blank = false;

    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;

        if lines.len() == MAX_LINES {
            truncated = true;
            break;
        }

        if line.chars().count() > MAX_LINE_CHARS {
            truncated = true;
            lines.push(line.chars().take(MAX_LINE_CHARS).collect::<String>());
        } else {
            lines.push(line.to_string());
        }
    }

    let mut out = lines.join("\n");
    if truncated {
        out.push('…');
    }
    out
}
