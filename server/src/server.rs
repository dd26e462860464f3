//! LSP server implementation
//!
//! `PythonLanguageServer` wires the document store, the change reconciler,
//! the parse/analyze pipeline, and the request resolvers behind the
//! tower-lsp `LanguageServer` trait. Notification handlers finish quickly
//! and push the real work onto the pipeline.

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::debug;

use crate::analysis::PythonVersion;
use crate::changes::{ChangeOptions, ChangeReconciler, DocumentChange};
use crate::completion::{CompletionOptionsSet, CompletionProvider};
use crate::config::{ClientFlags, InitializationOptions};
use crate::diagnostics::{part_uri, ClientSink};
use crate::document::{DocumentEntry, DocumentKind};
use crate::error::ServerError;
use crate::hover::HoverProvider;
use crate::interpreter::ProviderRegistry;
use crate::pipeline::{EventHub, ParseAnalyzePipeline};
use crate::queue::{AnalysisPriority, ParseQueue};
use crate::references::ReferencesProvider;
use crate::resolver::RequestResolver;
use crate::signature::SignatureProvider;
use crate::store::DocumentStore;
use crate::symbols::SymbolsProvider;
use crate::workspace::DirectoryLoader;

/// Read-request params extended with the `_version` pin.
///
/// Standard LSP request types cannot carry the pin, so these arrive on the
/// `python/*` companions to the standard methods (wired in the binary via
/// `custom_method`). A pinned version that disagrees with the current
/// parse fails `MismatchedVersion` with both values.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    #[serde(rename = "_version")]
    pub version: Option<i32>,
}

/// `python/completion` params: the version pin, an explicit expression
/// that bypasses tree walking, and the completion option switches.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedCompletionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    #[serde(rename = "_version")]
    pub version: Option<i32>,
    #[serde(rename = "_expr")]
    pub expression: Option<String>,
    #[serde(flatten)]
    pub options: CompletionOptionsSet,
}

/// `python/references` params.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedReferenceParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    #[serde(rename = "_version")]
    pub version: Option<i32>,
    #[serde(default)]
    pub context: Option<ReferenceContext>,
}

/// The Python language server.
pub struct PythonLanguageServer {
    client: Client,
    registry: Arc<ProviderRegistry>,
    store: Arc<DocumentStore>,
    pipeline: Arc<ParseAnalyzePipeline>,
    reconciler: ChangeReconciler,
    resolver: RequestResolver,
    completion: CompletionProvider,
    signature: SignatureProvider,
    hover_provider: HoverProvider,
    references_provider: ReferencesProvider,
    symbols_provider: SymbolsProvider,
    loader: RwLock<Option<Arc<DirectoryLoader>>>,
}

impl PythonLanguageServer {
    pub fn new(client: Client, registry: Arc<ProviderRegistry>) -> Self {
        let store = DocumentStore::new();
        let parse_queue = ParseQueue::new();
        let sink = Arc::new(ClientSink::new(client.clone()));
        let (pipeline, mut panics) = ParseAnalyzePipeline::new(
            Arc::clone(&store),
            parse_queue,
            sink,
            EventHub::new(),
        );

        // Surface unhandled analysis panics to the client log.
        {
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(message) = panics.recv().await {
                    client
                        .log_message(
                            MessageType::ERROR,
                            format!("unhandled analysis error: {message}"),
                        )
                        .await;
                }
            });
        }

        let reconciler = ChangeReconciler::new(Arc::clone(&store), Arc::clone(&pipeline));
        let resolver = RequestResolver::new(Arc::clone(&store), Arc::clone(&pipeline));

        Self {
            client,
            registry,
            store,
            pipeline,
            reconciler,
            resolver,
            completion: CompletionProvider::new(),
            signature: SignatureProvider::new(),
            hover_provider: HoverProvider::new(),
            references_provider: ReferencesProvider::new(),
            symbols_provider: SymbolsProvider::new(),
            loader: RwLock::new(None),
        }
    }

    fn server_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::INCREMENTAL),
                    ..Default::default()
                },
            )),

            hover_provider: Some(HoverProviderCapability::Simple(true)),

            completion_provider: Some(CompletionOptions {
                trigger_characters: Some(vec![".".to_string()]),
                resolve_provider: Some(true),
                ..Default::default()
            }),

            signature_help_provider: Some(SignatureHelpOptions {
                trigger_characters: Some(vec!["(".to_string(), ",".to_string()]),
                ..Default::default()
            }),

            references_provider: Some(OneOf::Left(true)),

            workspace_symbol_provider: Some(OneOf::Left(true)),

            ..Default::default()
        }
    }

    /// Classify a document by language id, falling back to the extension.
    fn document_kind(uri: &Url, language_id: Option<&str>) -> DocumentKind {
        if language_id == Some("python") {
            return DocumentKind::Python;
        }
        let analyzable = std::path::Path::new(uri.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e, "py" | "pyi" | "ipynb"))
            .unwrap_or(false);
        if analyzable {
            DocumentKind::Python
        } else {
            DocumentKind::PlainText
        }
    }

    async fn register_open_file(&self, entry: &Arc<DocumentEntry>) {
        if entry.module_info().await.name.is_some() {
            return;
        }
        let Some(path) = entry.path().cloned() else {
            return;
        };
        if let Some(loader) = self.loader.read().await.clone() {
            if let Err(err) = loader.add_file(&path).await {
                debug!(target: "pyls::server", "module registration failed: {err}");
            }
        }
    }

    async fn log_notification_error(&self, what: &str, err: ServerError) {
        self.client
            .log_message(MessageType::WARNING, format!("{what}: {err}"))
            .await;
    }

    /// Verbose protocol tracing to the client log, gated by the
    /// `python.traceLogging` capability flag.
    async fn trace_log(&self, message: String) {
        if self.pipeline.flags().trace_logging {
            self.client.log_message(MessageType::LOG, message).await;
        }
    }

    // Shared request bodies. The standard LSP handlers call these with no
    // version pin and default options; the `python/*` companions thread
    // through whatever the client sent.

    async fn resolve_completion(
        &self,
        uri: &Url,
        position: Position,
        expected_version: Option<i32>,
        expression: Option<&str>,
        options: &CompletionOptionsSet,
    ) -> Result<Option<CompletionResponse>> {
        self.trace_log(format!(
            "completion {uri}:{}:{}",
            position.line, position.character
        ))
        .await;
        match self.resolver.snapshot(uri, expected_version).await {
            Ok(snapshot) => {
                let items = self
                    .completion
                    .complete(&snapshot, position, expression, options);
                Ok(Some(CompletionResponse::Array(items)))
            }
            Err(err) if err.is_request_fault() => Err(err.into()),
            Err(_) => Ok(Some(CompletionResponse::Array(Vec::new()))),
        }
    }

    async fn resolve_signature_help(
        &self,
        uri: &Url,
        position: Position,
        expected_version: Option<i32>,
    ) -> Result<Option<SignatureHelp>> {
        self.trace_log(format!(
            "signatureHelp {uri}:{}:{}",
            position.line, position.character
        ))
        .await;
        match self.resolver.snapshot(uri, expected_version).await {
            Ok(snapshot) => Ok(self.signature.signature_help(&snapshot, position)),
            Err(err) if err.is_request_fault() => Err(err.into()),
            Err(_) => Ok(None),
        }
    }

    async fn resolve_references(
        &self,
        uri: &Url,
        position: Position,
        expected_version: Option<i32>,
        include_declaration: bool,
    ) -> Result<Option<Vec<Location>>> {
        self.trace_log(format!(
            "references {uri}:{}:{}",
            position.line, position.character
        ))
        .await;
        match self.resolver.snapshot(uri, expected_version).await {
            Ok(snapshot) => {
                let analyzer = self.pipeline.analyzer().await;
                let locations = self.references_provider.references(
                    &snapshot,
                    analyzer.as_ref(),
                    position,
                    include_declaration,
                );
                Ok(Some(locations))
            }
            Err(err) if err.is_request_fault() => Err(err.into()),
            Err(_) => Ok(Some(Vec::new())),
        }
    }

    async fn resolve_hover(
        &self,
        uri: &Url,
        position: Position,
        expected_version: Option<i32>,
    ) -> Result<Option<Hover>> {
        self.trace_log(format!(
            "hover {uri}:{}:{}",
            position.line, position.character
        ))
        .await;
        match self.resolver.snapshot(uri, expected_version).await {
            Ok(snapshot) => Ok(self.hover_provider.hover(&snapshot, position)),
            Err(err) if err.is_request_fault() => Err(err.into()),
            Err(_) => Ok(None),
        }
    }

    // Extended companions to the standard read requests, reachable as
    // `python/completion`, `python/signatureHelp`, `python/references`,
    // and `python/hover`.

    pub async fn completion_extended(
        &self,
        params: ExtendedCompletionParams,
    ) -> Result<Option<CompletionResponse>> {
        self.resolve_completion(
            &params.text_document.uri,
            params.position,
            params.version,
            params.expression.as_deref(),
            &params.options,
        )
        .await
    }

    pub async fn signature_help_extended(
        &self,
        params: ExtendedPositionParams,
    ) -> Result<Option<SignatureHelp>> {
        self.resolve_signature_help(&params.text_document.uri, params.position, params.version)
            .await
    }

    pub async fn references_extended(
        &self,
        params: ExtendedReferenceParams,
    ) -> Result<Option<Vec<Location>>> {
        let include_declaration = params
            .context
            .map(|c| c.include_declaration)
            .unwrap_or(true);
        self.resolve_references(
            &params.text_document.uri,
            params.position,
            params.version,
            include_declaration,
        )
        .await
    }

    pub async fn hover_extended(&self, params: ExtendedPositionParams) -> Result<Option<Hover>> {
        self.resolve_hover(&params.text_document.uri, params.position, params.version)
            .await
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for PythonLanguageServer {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let options = InitializationOptions::from_params(&params);
        let flags = ClientFlags::from_params(&params);
        self.pipeline.set_flags(flags.clone());

        let mut version = PythonVersion::new(3, 7);
        let mut search_paths: Vec<PathBuf> = options.search_paths.clone();

        match self.registry.create(&options.interpreter) {
            Ok(handle) => {
                version = handle.version;
                search_paths.extend(handle.analyzer.search_paths());
                self.pipeline.parse_queue().set_parser(handle.parser);
                self.pipeline.set_analyzer(handle.analyzer).await;
            }
            Err(err) => {
                self.client
                    .log_message(
                        MessageType::ERROR,
                        format!("interpreter unavailable, serving without analysis: {err}"),
                    )
                    .await;
            }
        }

        let root = params.root_uri.as_ref().and_then(|u| u.to_file_path().ok());
        if let Some(root) = root.as_ref() {
            search_paths.insert(0, root.clone());
        }

        let loader = Arc::new(DirectoryLoader::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pipeline),
            version,
            search_paths,
        ));
        *self.loader.write().await = Some(Arc::clone(&loader));

        if let Some(root) = root {
            if !flags.manual_file_load {
                let client = self.client.clone();
                tokio::spawn(async move {
                    if let Err(err) = loader.load_directory(&root).await {
                        client
                            .log_message(
                                MessageType::WARNING,
                                format!("workspace scan failed: {err}"),
                            )
                            .await;
                    }
                });
            }
        }

        Ok(InitializeResult {
            capabilities: Self::server_capabilities(),
            server_info: Some(ServerInfo {
                name: "pyls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "Python language server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        self.pipeline.shutdown().await;
        Ok(())
    }

    // === Document Synchronization ===

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let part = DocumentStore::get_part(&uri);
        let kind = Self::document_kind(&uri, Some(params.text_document.language_id.as_str()));
        self.trace_log(format!(
            "didOpen {uri} v{}",
            params.text_document.version
        ))
        .await;

        let entry = self.store.get_or_add(&uri, kind);
        entry
            .with_document(|doc| {
                doc.reset(part, params.text_document.version, Some(&params.text_document.text))
            })
            .await;
        self.register_open_file(&entry).await;

        self.pipeline.enqueue(entry, AnalysisPriority::High, true);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        self.trace_log(format!(
            "didChange {} -> v{}",
            params.text_document.uri, params.text_document.version
        ))
        .await;
        let change = DocumentChange {
            uri: params.text_document.uri,
            version: Some(params.text_document.version),
            changes: Some(params.content_changes),
        };
        if let Err(err) = self.reconciler.apply(change, &ChangeOptions::default()).await {
            self.log_notification_error("didChange dropped", err).await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        if let Some(entry) = self.store.get(&params.text_document.uri) {
            self.pipeline.enqueue(entry, AnalysisPriority::Normal, true);
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        let part = DocumentStore::get_part(&uri);
        self.trace_log(format!("didClose {uri}")).await;
        let Some(entry) = self.store.get(&uri) else {
            return;
        };
        entry.with_document(|doc| doc.reset(part, 0, None)).await;

        // Clear the editor's squiggles for the buffer that just went away,
        // without regressing the published version.
        let canonical = DocumentStore::canonical_uri(&uri);
        let version = self
            .store
            .reported()
            .published_version(&canonical, part)
            .unwrap_or(0);
        if self.store.reported().try_refresh(&canonical, part, version) {
            self.client
                .publish_diagnostics(part_uri(&canonical, part), Vec::new(), Some(version))
                .await;
        }
    }

    // === Workspace ===

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        let loader = self.loader.read().await.clone();
        for event in params.changes {
            match event.typ {
                FileChangeType::CREATED => {
                    let Some(loader) = loader.as_ref() else {
                        continue;
                    };
                    let Ok(path) = event.uri.to_file_path() else {
                        continue;
                    };
                    match loader.add_file(&path).await {
                        Ok(entry) => self.pipeline.enqueue(entry, AnalysisPriority::Low, true),
                        Err(err) => self.log_notification_error("file load failed", err).await,
                    }
                }
                FileChangeType::DELETED => {
                    if let Some(loader) = loader.as_ref() {
                        if let Err(err) = loader.unload_file(&event.uri).await {
                            debug!(target: "pyls::server", "unload: {err}");
                        }
                    }
                }
                FileChangeType::CHANGED => {
                    if let Some(entry) = self.store.get(&event.uri) {
                        // An open buffer supersedes the file on disk.
                        if !entry.is_in_memory().await {
                            self.pipeline.enqueue(entry, AnalysisPriority::Low, true);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    async fn did_change_configuration(&self, _params: DidChangeConfigurationParams) {
        if let Some(analyzer) = self.pipeline.analyzer().await {
            analyzer.reload_modules();
        }
        for entry in self.store.entries() {
            self.pipeline.enqueue(entry, AnalysisPriority::Normal, true);
        }
    }

    // === Read requests ===

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        self.resolve_completion(&uri, position, None, None, &CompletionOptionsSet::default())
            .await
    }

    async fn completion_resolve(&self, item: CompletionItem) -> Result<CompletionItem> {
        Ok(item)
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        self.resolve_signature_help(&uri, position, None).await
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        self.resolve_references(&uri, position, None, params.context.include_declaration)
            .await
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        self.resolve_hover(&uri, position, None).await
    }

    async fn symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> Result<Option<Vec<SymbolInformation>>> {
        let symbols = self
            .symbols_provider
            .workspace_symbols(&self.store, &params.query)
            .await;
        if symbols.is_empty() {
            Ok(None)
        } else {
            Ok(Some(symbols))
        }
    }
}
