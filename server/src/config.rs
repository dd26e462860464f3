//! Server configuration
//!
//! Initialization options select the interpreter backing the analyzer;
//! client capability flags under the `python.` namespace tune server
//! behavior per editor session.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tower_lsp::lsp_types::InitializeParams;

/// Interpreter selection carried in `initializationOptions.interpreter`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterOptions {
    /// Path to a provider library for out-of-tree interpreters.
    pub assembly: Option<PathBuf>,
    /// Identifier of the interpreter factory to instantiate.
    pub type_name: Option<String>,
    /// Opaque properties forwarded to the factory.
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    /// Language version, e.g. "3.7".
    pub version: Option<String>,
}

/// `initializationOptions` recognized by the server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationOptions {
    #[serde(default)]
    pub interpreter: InterpreterOptions,
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

impl InitializationOptions {
    pub fn from_params(params: &InitializeParams) -> Self {
        params
            .initialization_options
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Client capability flags under the experimental `python.` namespace.
#[derive(Debug, Clone)]
pub struct ClientFlags {
    /// Send verbose per-request traces to the client log.
    pub trace_logging: bool,
    /// Publish diagnostics as documents change.
    pub live_linting: bool,
    /// Suppress the workspace scan at initialize; the client loads files
    /// one by one.
    pub manual_file_load: bool,
    /// Milliseconds a completion request may wait for the current parse.
    /// Negative means wait indefinitely.
    pub completions_timeout_ms: i64,
    /// Re-publish diagnostics when analysis refines a version the client
    /// has already seen; off, analysis results wait for the next version.
    pub analysis_updates: bool,
}

impl Default for ClientFlags {
    fn default() -> Self {
        Self {
            trace_logging: false,
            live_linting: true,
            manual_file_load: false,
            completions_timeout_ms: -1,
            analysis_updates: false,
        }
    }
}

impl ClientFlags {
    /// Extract `python.*` flags from the client's experimental capabilities.
    pub fn from_params(params: &InitializeParams) -> Self {
        let mut flags = Self::default();
        let Some(experimental) = params.capabilities.experimental.as_ref() else {
            return flags;
        };

        if let Some(v) = flag(experimental, "python.traceLogging") {
            flags.trace_logging = v;
        }
        if let Some(v) = flag(experimental, "python.liveLinting") {
            flags.live_linting = v;
        }
        if let Some(v) = flag(experimental, "python.manualFileLoad") {
            flags.manual_file_load = v;
        }
        if let Some(v) = experimental
            .get("python.completionsTimeout")
            .and_then(Value::as_i64)
        {
            flags.completions_timeout_ms = v;
        }
        if let Some(v) = flag(experimental, "python.analysisUpdates") {
            flags.analysis_updates = v;
        }
        flags
    }
}

fn flag(experimental: &Value, name: &str) -> Option<bool> {
    experimental.get(name).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let flags = ClientFlags::default();
        assert!(flags.live_linting);
        assert!(!flags.manual_file_load);
        assert_eq!(flags.completions_timeout_ms, -1);
    }

    #[test]
    fn test_flags_from_experimental() {
        let mut params = InitializeParams::default();
        params.capabilities.experimental = Some(serde_json::json!({
            "python.traceLogging": true,
            "python.completionsTimeout": 250,
            "python.liveLinting": false,
        }));

        let flags = ClientFlags::from_params(&params);
        assert!(flags.trace_logging);
        assert!(!flags.live_linting);
        assert_eq!(flags.completions_timeout_ms, 250);
    }

    #[test]
    fn test_initialization_options() {
        let mut params = InitializeParams::default();
        params.initialization_options = Some(serde_json::json!({
            "interpreter": {
                "typeName": "cpython",
                "version": "3.7",
            },
            "searchPaths": ["/lib/site-packages"],
        }));

        let options = InitializationOptions::from_params(&params);
        assert_eq!(options.interpreter.type_name.as_deref(), Some("cpython"));
        assert_eq!(options.interpreter.version.as_deref(), Some("3.7"));
        assert_eq!(options.search_paths.len(), 1);
    }
}
