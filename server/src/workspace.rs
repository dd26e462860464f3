//! Workspace directory loading
//!
//! Enumerates source files under the workspace root, creates entries for
//! them, and keeps the analyzer's module table in step: adding a file
//! registers its module name and every alias the search paths produce, and
//! re-enqueues dependents; unloading reverses that.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_lsp::lsp_types::Url;
use tracing::debug;

use crate::analysis::PythonVersion;
use crate::document::{DocumentEntry, DocumentKind, ModuleInfo};
use crate::error::{Result, ServerError};
use crate::pipeline::{ParseAnalyzePipeline, ServerEvent};
use crate::queue::AnalysisPriority;
use crate::store::DocumentStore;

const SOURCE_EXTENSIONS: &[&str] = &["py", "pyi"];
const INIT_STEMS: &[&str] = &["__init__.py", "__init__.pyi"];

pub struct DirectoryLoader {
    store: Arc<DocumentStore>,
    pipeline: Arc<ParseAnalyzePipeline>,
    version: PythonVersion,
    search_paths: Vec<PathBuf>,
}

impl DirectoryLoader {
    pub fn new(
        store: Arc<DocumentStore>,
        pipeline: Arc<ParseAnalyzePipeline>,
        version: PythonVersion,
        search_paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            store,
            pipeline,
            version,
            search_paths,
        }
    }

    /// Load every source file under `root`: files first, non-recursively,
    /// then subdirectories that qualify as packages for the configured
    /// language version.
    pub async fn load_directory(&self, root: &Path) -> Result<()> {
        let mut subdirectories = Vec::new();

        let entries = std::fs::read_dir(root)
            .map_err(|e| ServerError::Internal(format!("read_dir {}: {e}", root.display())))?;
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if path.is_dir() {
                subdirectories.push(path);
            } else if is_source_file(&path) {
                if let Err(err) = self.add_file(&path).await {
                    debug!(target: "pyls::workspace", "skipping {}: {err}", path.display());
                }
            }
        }

        for directory in subdirectories {
            if self.version.requires_init_files() && !has_init_file(&directory) {
                continue;
            }
            Box::pin(self.load_directory(&directory)).await?;
        }
        Ok(())
    }

    /// Create (or refresh) the entry for a file, register its module names
    /// with the analyzer, and wake everything that imports it.
    pub async fn add_file(&self, path: &Path) -> Result<Arc<DocumentEntry>> {
        let uri = Url::from_file_path(path)
            .map_err(|_| ServerError::Internal(format!("not a file path: {}", path.display())))?;
        let entry = self.store.get_or_add(&uri, DocumentKind::Python);

        let info = self.module_info_for(path);
        entry.set_module_info(info.clone()).await;
        self.register_module(&entry, &info).await;

        self.pipeline.events().emit(ServerEvent::FileFound { uri });
        self.pipeline
            .enqueue(Arc::clone(&entry), AnalysisPriority::Low, true);
        Ok(entry)
    }

    /// Register the entry's module name and aliases with the analyzer and
    /// re-enqueue importers at Low priority. No-op without an analyzer.
    pub async fn register_module(&self, entry: &Arc<DocumentEntry>, info: &ModuleInfo) {
        let Some(analyzer) = self.pipeline.analyzer().await else {
            return;
        };
        let Some(name) = info.name.as_deref() else {
            return;
        };

        let cookie = entry
            .current_parse()
            .await
            .map(|p| p.cookie)
            .unwrap_or_default();
        let handle = analyzer.add_module(name, entry.path().map(PathBuf::as_path), entry.uri(), &cookie);
        entry.set_analysis(handle).await;

        for alias in &info.aliases {
            if alias != name {
                analyzer.add_module_alias(name, alias);
            }
        }

        let mut names = vec![name.to_string()];
        names.extend(info.aliases.iter().cloned());
        for imported_name in names {
            for dependent in analyzer.entries_importing(&imported_name, false) {
                if let Some(dependent_entry) = self.store.get(&dependent) {
                    self.pipeline
                        .enqueue(dependent_entry, AnalysisPriority::Low, true);
                }
            }
        }
    }

    /// Drop the entry for a deleted file. The module leaves the analyzer
    /// and every importer is re-enqueued so its diagnostics reflect the
    /// missing dependency.
    pub async fn unload_file(&self, uri: &Url) -> Result<()> {
        let entry = self
            .store
            .remove(uri)
            .ok_or_else(|| ServerError::UnknownDocument(uri.clone()))?;

        let Some(analyzer) = self.pipeline.analyzer().await else {
            return Ok(());
        };
        let info = entry.module_info().await;
        let Some(name) = info.name else {
            return Ok(());
        };

        let dependents = analyzer.entries_importing(&name, false);
        analyzer.remove_module(&name);
        for dependent in dependents {
            if let Some(dependent_entry) = self.store.get(&dependent) {
                self.pipeline
                    .enqueue(dependent_entry, AnalysisPriority::Low, true);
            }
        }
        Ok(())
    }

    /// Module name and aliases for a path: one dotted name per search path
    /// that contains it, shortest first. Files outside every search path
    /// fall back to their stem.
    fn module_info_for(&self, path: &Path) -> ModuleInfo {
        let mut names: Vec<String> = self
            .search_paths
            .iter()
            .filter_map(|sp| module_name_relative(path, sp))
            .collect();
        names.sort_by_key(String::len);
        names.dedup();

        let fallback = || {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        };
        let name = names.first().cloned().or_else(fallback);
        let aliases = if names.len() > 1 {
            names[1..].to_vec()
        } else {
            Vec::new()
        };
        ModuleInfo { name, aliases }
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn has_init_file(directory: &Path) -> bool {
    INIT_STEMS.iter().any(|init| directory.join(init).is_file())
}

/// Dotted module name of `path` relative to `search_path`, if inside it.
/// An `__init__` file names its package directory.
fn module_name_relative(path: &Path, search_path: &Path) -> Option<String> {
    let relative = path.strip_prefix(search_path).ok()?;
    let mut segments: Vec<String> = Vec::new();
    for component in relative.components() {
        let std::path::Component::Normal(name) = component else {
            return None;
        };
        segments.push(name.to_str()?.to_string());
    }

    let file = segments.pop()?;
    let stem = Path::new(&file).file_stem()?.to_str()?.to_string();
    if stem != "__init__" {
        segments.push(stem);
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::noop_pipeline;
    use std::fs;
    use tempfile::TempDir;

    fn loader_for(root: &TempDir, version: PythonVersion) -> (Arc<DocumentStore>, DirectoryLoader) {
        let store = DocumentStore::new();
        let pipeline = noop_pipeline(&store);
        let loader = DirectoryLoader::new(
            Arc::clone(&store),
            pipeline,
            version,
            vec![root.path().to_path_buf()],
        );
        (store, loader)
    }

    #[test]
    fn test_module_name_relative() {
        let sp = Path::new("/workspace");
        assert_eq!(
            module_name_relative(Path::new("/workspace/util.py"), sp).as_deref(),
            Some("util")
        );
        assert_eq!(
            module_name_relative(Path::new("/workspace/pkg/mod.py"), sp).as_deref(),
            Some("pkg.mod")
        );
        assert_eq!(
            module_name_relative(Path::new("/workspace/pkg/__init__.py"), sp).as_deref(),
            Some("pkg")
        );
        assert_eq!(
            module_name_relative(Path::new("/elsewhere/x.py"), sp),
            None
        );
    }

    #[tokio::test]
    async fn test_scan_skips_uninitialized_packages_on_old_versions() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("main.py"), "pass").unwrap();
        fs::create_dir(root.path().join("pkg")).unwrap();
        fs::write(root.path().join("pkg/mod.py"), "pass").unwrap();
        fs::create_dir(root.path().join("bare")).unwrap();
        fs::write(root.path().join("bare/loose.py"), "pass").unwrap();
        fs::write(root.path().join("pkg/__init__.py"), "").unwrap();
        fs::write(root.path().join("notes.txt"), "not source").unwrap();

        let (store, loader) = loader_for(&root, PythonVersion::new(2, 7));
        loader.load_directory(root.path()).await.unwrap();

        let uris: Vec<String> = store
            .entries()
            .iter()
            .map(|e| e.uri().as_str().to_string())
            .collect();
        assert!(uris.iter().any(|u| u.ends_with("/main.py")));
        assert!(uris.iter().any(|u| u.ends_with("/pkg/mod.py")));
        assert!(uris.iter().any(|u| u.ends_with("/pkg/__init__.py")));
        // No __init__ file, so the subtree is not a package under 2.7.
        assert!(!uris.iter().any(|u| u.contains("/bare/")));
        assert!(!uris.iter().any(|u| u.ends_with(".txt")));
    }

    #[tokio::test]
    async fn test_scan_descends_namespace_packages_on_new_versions() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("bare")).unwrap();
        fs::write(root.path().join("bare/loose.py"), "pass").unwrap();

        let (store, loader) = loader_for(&root, PythonVersion::new(3, 7));
        loader.load_directory(root.path()).await.unwrap();

        assert!(store
            .entries()
            .iter()
            .any(|e| e.uri().as_str().ends_with("/bare/loose.py")));
    }

    #[tokio::test]
    async fn test_add_file_fires_file_found() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("mod.py");
        fs::write(&file, "pass").unwrap();

        let (_store, loader) = loader_for(&root, PythonVersion::new(3, 7));
        let mut events = loader.pipeline.events().subscribe();
        let entry = loader.add_file(&file).await.unwrap();
        assert_eq!(entry.module_info().await.name.as_deref(), Some("mod"));

        match events.try_recv() {
            Ok(ServerEvent::FileFound { uri }) => {
                assert!(uri.as_str().ends_with("/mod.py"));
            }
            other => panic!("expected FileFound, got {other:?}"),
        }
    }
}
