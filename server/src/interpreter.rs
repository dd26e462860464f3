//! Interpreter provider registry
//!
//! The parser and analyzer come from an *interpreter provider* selected by
//! `initializationOptions.interpreter`. In-tree providers register under an
//! identifier; out-of-tree providers ship as shared libraries exporting
//! `pyls_interpreter_init`, which receives the registry and registers
//! itself the same way.
//!
//! Provider libraries must be compiled against the same version of this
//! crate. There is no stable ABI; version skew will crash. Library handles
//! are intentionally leaked since providers are never unloaded.

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

use crate::analysis::{Analyzer, PythonVersion, SyntaxParser};
use crate::config::InterpreterOptions;
use crate::error::{Result, ServerError};

/// Everything the server needs from one interpreter.
pub struct InterpreterHandle {
    pub version: PythonVersion,
    pub parser: Arc<dyn SyntaxParser>,
    pub analyzer: Arc<dyn Analyzer>,
}

/// Factory for interpreter handles, registered under a stable identifier.
pub trait InterpreterProvider: Send + Sync {
    fn identifier(&self) -> &str;

    fn create(&self, options: &InterpreterOptions) -> Result<InterpreterHandle>;
}

/// The function signature provider libraries must export.
///
/// `extern "C"` for symbol visibility only; the argument is a Rust type.
pub type ProviderInitFn = unsafe extern "C" fn(registry: &ProviderRegistry);

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Mutex<FxHashMap<String, Arc<dyn InterpreterProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, provider: Arc<dyn InterpreterProvider>) {
        let mut providers = self.providers.lock().expect("provider map");
        providers.insert(provider.identifier().to_string(), provider);
    }

    /// Resolve the configured provider and create an interpreter handle.
    /// A configured library path is loaded first so the provider it
    /// registers is visible to the lookup.
    pub fn create(&self, options: &InterpreterOptions) -> Result<InterpreterHandle> {
        if let Some(library) = options.assembly.as_ref() {
            self.load_library(library)?;
        }

        let type_name = options
            .type_name
            .as_deref()
            .ok_or_else(|| ServerError::Internal("no interpreter configured".to_string()))?;
        let provider = {
            let providers = self.providers.lock().expect("provider map");
            providers.get(type_name).cloned()
        }
        .ok_or_else(|| ServerError::Internal(format!("unknown interpreter: {type_name}")))?;

        provider.create(options)
    }

    fn load_library(&self, path: &std::path::Path) -> Result<()> {
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            ServerError::Internal(format!("failed to load provider {}: {e}", path.display()))
        })?;
        let init: libloading::Symbol<ProviderInitFn> =
            unsafe { library.get(b"pyls_interpreter_init") }.map_err(|e| {
                ServerError::Internal(format!(
                    "provider {} missing pyls_interpreter_init: {e}",
                    path.display()
                ))
            })?;
        unsafe { init(self) };

        // Never unload: provider vtables must outlive every handle.
        std::mem::forget(library);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::VersionParser;
    use tower_lsp::lsp_types::{Diagnostic, Location, Url};

    struct NullAnalyzer;

    #[async_trait::async_trait]
    impl Analyzer for NullAnalyzer {
        fn add_module(
            &self,
            _name: &str,
            _path: Option<&std::path::Path>,
            _uri: &Url,
            _cookie: &crate::analysis::ParseCookie,
        ) -> Arc<dyn crate::analysis::AnalysisEntry> {
            unimplemented!("not exercised")
        }

        fn add_module_alias(&self, _name: &str, _alias: &str) {}

        fn remove_module(&self, _name: &str) {}

        fn entries_importing(&self, _name: &str, _recursive: bool) -> Vec<Url> {
            Vec::new()
        }

        fn search_paths(&self) -> Vec<std::path::PathBuf> {
            Vec::new()
        }

        async fn analyze(&self, _uri: &Url) -> Result<()> {
            Ok(())
        }

        fn get_diagnostics(&self, _uri: &Url, _part: i32) -> Vec<Diagnostic> {
            Vec::new()
        }

        fn module_locations(&self, _name: &str) -> Vec<Location> {
            Vec::new()
        }

        fn reload_modules(&self) {}
    }

    struct TestProvider;

    impl InterpreterProvider for TestProvider {
        fn identifier(&self) -> &str {
            "test"
        }

        fn create(&self, options: &InterpreterOptions) -> Result<InterpreterHandle> {
            let version = options
                .version
                .as_deref()
                .and_then(PythonVersion::parse)
                .unwrap_or(PythonVersion::new(3, 7));
            Ok(InterpreterHandle {
                version,
                parser: Arc::new(VersionParser),
                analyzer: Arc::new(NullAnalyzer),
            })
        }
    }

    #[test]
    fn test_registered_provider_resolves() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(TestProvider));

        let options = InterpreterOptions {
            type_name: Some("test".to_string()),
            version: Some("3.6".to_string()),
            ..Default::default()
        };
        let handle = registry.create(&options).unwrap();
        assert_eq!(handle.version, PythonVersion::new(3, 6));
    }

    #[test]
    fn test_unknown_provider_fails() {
        let registry = ProviderRegistry::new();
        let options = InterpreterOptions {
            type_name: Some("missing".to_string()),
            ..Default::default()
        };
        assert!(registry.create(&options).is_err());
    }

    #[test]
    fn test_unconfigured_interpreter_fails() {
        let registry = ProviderRegistry::new();
        assert!(registry.create(&InterpreterOptions::default()).is_err());
    }
}
