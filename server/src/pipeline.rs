//! Parse/analyze pipeline
//!
//! Orchestrates the path from "this document changed" to published
//! diagnostics: throttled parse submission, analysis kick-off, and the
//! version-gated publish. Every enqueue is its own exception boundary;
//! nothing here propagates into a request handler.

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{broadcast, mpsc, RwLock};
use tower_lsp::lsp_types::Url;
use tracing::{error, warn};

use crate::analysis::{Analyzer, ParseCookie};
use crate::config::ClientFlags;
use crate::counter::VolatileCounter;
use crate::diagnostics::{part_uri, DiagnosticSink};
use crate::document::DocumentEntry;
use crate::error::ServerError;
use crate::queue::{AnalysisHandler, AnalysisPriority, AnalysisQueue, ParseQueue};
use crate::store::DocumentStore;

/// Maximum in-flight parse intents per document. Extra enqueues are
/// dropped; a later enqueue observes the newest text anyway.
pub const MAX_PENDING_PARSES: usize = 3;

/// Notifications emitted as work completes. Subscribers receive owned
/// copies and cannot reach back into core state.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ParseComplete { uri: Url, version: i32 },
    AnalysisComplete { uri: Url, version: i32 },
    FileFound { uri: Url },
}

/// Broadcast hub for [`ServerEvent`].
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ParseAnalyzePipeline {
    store: Arc<DocumentStore>,
    parse_queue: Arc<ParseQueue>,
    analysis_queue: OnceLock<Arc<AnalysisQueue>>,
    analyzer: RwLock<Option<Arc<dyn Analyzer>>>,
    sink: Arc<dyn DiagnosticSink>,
    events: EventHub,
    flags: std::sync::RwLock<ClientFlags>,
    pending_parses: Mutex<FxHashMap<Url, Arc<VolatileCounter>>>,
}

impl ParseAnalyzePipeline {
    /// Wire the pipeline and its analysis queue. The returned receiver
    /// carries unhandled analysis panics for the caller to log.
    pub fn new(
        store: Arc<DocumentStore>,
        parse_queue: Arc<ParseQueue>,
        sink: Arc<dyn DiagnosticSink>,
        events: EventHub,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let pipeline = Arc::new(Self {
            store,
            parse_queue,
            analysis_queue: OnceLock::new(),
            analyzer: RwLock::new(None),
            sink,
            events,
            flags: std::sync::RwLock::new(ClientFlags::default()),
            pending_parses: Mutex::new(FxHashMap::default()),
        });

        let handler: Arc<dyn AnalysisHandler> = Arc::clone(&pipeline) as _;
        let (queue, panics) = AnalysisQueue::new(handler);
        pipeline
            .analysis_queue
            .set(queue)
            .unwrap_or_else(|_| unreachable!("queue wired once"));
        (pipeline, panics)
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn analysis_queue(&self) -> &Arc<AnalysisQueue> {
        self.analysis_queue.get().expect("queue wired in new")
    }

    pub fn parse_queue(&self) -> &Arc<ParseQueue> {
        &self.parse_queue
    }

    pub fn set_flags(&self, flags: ClientFlags) {
        *self.flags.write().expect("flags") = flags;
    }

    pub fn flags(&self) -> ClientFlags {
        self.flags.read().expect("flags").clone()
    }

    pub async fn set_analyzer(&self, analyzer: Arc<dyn Analyzer>) {
        *self.analyzer.write().await = Some(analyzer);
    }

    pub async fn analyzer(&self) -> Option<Arc<dyn Analyzer>> {
        self.analyzer.read().await.clone()
    }

    /// Shutdown: clear the analyzer so in-flight work observes its absence
    /// and returns, then stop both queues.
    pub async fn shutdown(&self) {
        self.analyzer.write().await.take();
        self.parse_queue.stop();
        self.analysis_queue().stop().await;
    }

    /// Enqueue a document for (re)parse at `priority`, optionally for
    /// analysis afterwards. Returns immediately; the work proceeds on the
    /// runtime. Dropped when the per-document intent cap is reached.
    pub fn enqueue(
        self: &Arc<Self>,
        entry: Arc<DocumentEntry>,
        priority: AnalysisPriority,
        analyze: bool,
    ) {
        // The intent is claimed synchronously so a burst of enqueues
        // observes the cap before any of them reaches the parse queue.
        let counter = self.parse_counter(entry.uri());
        if counter.value() >= MAX_PENDING_PARSES {
            return;
        }
        let guard = counter.increment();

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let uri = entry.uri().clone();
            let result = {
                let _guard = guard;
                pipeline.process(entry, priority, analyze).await
            };
            pipeline.release_parse_counter(&uri);
            match result {
                Ok(()) | Err(ServerError::BadSource) => {}
                Err(ServerError::Cancelled) => {
                    warn!(target: "pyls::pipeline", %uri, "parse cancelled");
                }
                Err(err) => {
                    error!(target: "pyls::pipeline", %uri, "parse failed: {err}");
                }
            }
        });
    }

    /// Block until no parse intents remain for `uri`.
    pub async fn wait_parse_drained(&self, uri: &Url) {
        let counter = {
            let pending = self.pending_parses.lock().expect("pending parses");
            pending.get(&DocumentStore::canonical_uri(uri)).cloned()
        };
        if let Some(counter) = counter {
            counter.wait_for_zero().await;
        }
    }

    async fn process(
        self: &Arc<Self>,
        entry: Arc<DocumentEntry>,
        priority: AnalysisPriority,
        analyze: bool,
    ) -> crate::error::Result<()> {
        let uri = entry.uri().clone();
        let cookie = self.parse_queue.submit(&entry).await?;

        if cookie.is_empty() {
            // No versioning available from this parse.
            self.events.emit(ServerEvent::ParseComplete {
                uri: uri.clone(),
                version: 0,
            });
        } else {
            for (_, version) in cookie.parts() {
                self.events.emit(ServerEvent::ParseComplete {
                    uri: uri.clone(),
                    version,
                });
            }
        }

        if analyze && entry.is_analyzable() {
            self.analysis_queue()
                .enqueue(Arc::clone(&entry), priority);
        }

        // Let the caller finish its turn before diagnostics go out.
        tokio::task::yield_now().await;
        self.publish_diagnostics(&entry, &cookie, false).await;
        Ok(())
    }

    /// Publish per-part diagnostics gated on the monotonic version guard.
    /// `refresh` lets an analysis pass re-publish at the version a parse
    /// already reported (granted only when the client opted into analysis
    /// updates); stale versions never get out either way.
    async fn publish_diagnostics(&self, entry: &DocumentEntry, cookie: &ParseCookie, refresh: bool) {
        let Some(analyzer) = self.analyzer().await else {
            return;
        };
        if !self.flags().live_linting {
            return;
        }

        let uri = entry.uri();
        let reported = self.store.reported();
        for (part, version) in cookie.parts() {
            let allowed = if refresh {
                reported.try_refresh(uri, part, version)
            } else {
                reported.try_advance(uri, part, version)
            };
            if allowed {
                let diagnostics = analyzer.get_diagnostics(uri, part);
                self.sink
                    .publish(part_uri(uri, part), version, diagnostics)
                    .await;
            }
        }
    }

    fn parse_counter(&self, uri: &Url) -> Arc<VolatileCounter> {
        let mut pending = self.pending_parses.lock().expect("pending parses");
        pending
            .entry(DocumentStore::canonical_uri(uri))
            .or_insert_with(VolatileCounter::new)
            .clone()
    }

    /// Drop a document's counter once it drains; the map only holds
    /// documents with work in flight.
    fn release_parse_counter(&self, uri: &Url) {
        let mut pending = self.pending_parses.lock().expect("pending parses");
        let canonical = DocumentStore::canonical_uri(uri);
        if pending.get(&canonical).is_some_and(|c| c.is_zero()) {
            pending.remove(&canonical);
        }
    }
}

#[async_trait::async_trait]
impl AnalysisHandler for ParseAnalyzePipeline {
    async fn analyze(&self, entry: Arc<DocumentEntry>) {
        // A cleared analyzer means shutdown already happened.
        let Some(analyzer) = self.analyzer().await else {
            return;
        };
        let uri = entry.uri().clone();

        match analyzer.analyze(&uri).await {
            Ok(()) => {
                let cookie = entry
                    .current_parse()
                    .await
                    .map(|s| s.cookie)
                    .unwrap_or_default();
                if cookie.is_empty() {
                    self.events.emit(ServerEvent::AnalysisComplete {
                        uri: uri.clone(),
                        version: 0,
                    });
                } else {
                    for (_, version) in cookie.parts() {
                        self.events.emit(ServerEvent::AnalysisComplete {
                            uri: uri.clone(),
                            version,
                        });
                    }
                }
                // With analysisUpdates the client wants refreshed
                // diagnostics for versions it has already seen; without it,
                // analysis results wait for the next version to publish.
                let refresh = self.flags().analysis_updates;
                self.publish_diagnostics(&entry, &cookie, refresh).await;
            }
            Err(ServerError::BadSource) => {}
            Err(ServerError::Cancelled) => {
                warn!(target: "pyls::pipeline", %uri, "analysis cancelled");
            }
            Err(err) => {
                error!(target: "pyls::pipeline", %uri, "analysis failed: {err}");
            }
        }
    }

    async fn cancelled(&self, entry: Arc<DocumentEntry>) {
        warn!(
            target: "pyls::pipeline",
            uri = %entry.uri(),
            "analysis dropped at shutdown"
        );
    }
}
