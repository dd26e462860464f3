//! Signature help provider

use tower_lsp::lsp_types::{
    Documentation, ParameterInformation, ParameterLabel, Position, SignatureHelp,
    SignatureInformation,
};

use crate::analysis::OverloadResult;
use crate::resolver::RequestSnapshot;

pub struct SignatureProvider;

impl SignatureProvider {
    pub fn new() -> Self {
        Self
    }

    /// Signature help for the call enclosing `position`.
    ///
    /// The active signature is the lowest-arity overload that still has a
    /// parameter for the active slot, so typing a third argument flips
    /// past two-parameter overloads automatically.
    pub fn signature_help(
        &self,
        snapshot: &RequestSnapshot,
        position: Position,
    ) -> Option<SignatureHelp> {
        let parse = snapshot.parse.as_ref()?;
        let analysis = snapshot.analysis.as_ref()?;
        let call = parse.tree.find_enclosing_call(snapshot.part, position)?;

        let overloads = analysis.signatures_of(&call.callee, position);
        if overloads.is_empty() {
            return None;
        }

        let active_parameter = call.argument_index.unwrap_or(0);
        let active_signature = overloads
            .iter()
            .enumerate()
            .filter(|(_, o)| o.parameters.len() as u32 > active_parameter)
            .min_by_key(|(_, o)| o.parameters.len())
            .map(|(index, _)| index as u32);

        Some(SignatureHelp {
            signatures: overloads.into_iter().map(to_signature).collect(),
            active_signature,
            active_parameter: Some(active_parameter),
        })
    }
}

impl Default for SignatureProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn to_signature(overload: OverloadResult) -> SignatureInformation {
    let parameters = overload
        .parameters
        .into_iter()
        .map(|p| ParameterInformation {
            label: ParameterLabel::Simple(p.name),
            documentation: p.documentation.map(Documentation::String),
        })
        .collect();
    SignatureInformation {
        label: overload.label,
        documentation: overload.documentation.map(Documentation::String),
        parameters: Some(parameters),
        active_parameter: None,
    }
}
