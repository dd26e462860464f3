//! Parse and analysis queues
//!
//! The parse queue serializes parses per document while letting distinct
//! documents parse concurrently. The analysis queue is a three-priority
//! FIFO drained by a dedicated worker task. Both shut down cooperatively.

use futures::FutureExt;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::Url;
use tracing::warn;

use crate::analysis::{ParseCookie, SyntaxParser};
use crate::counter::{CounterGuard, VolatileCounter};
use crate::document::DocumentEntry;
use crate::error::{Result, ServerError};

/// Serializes parse submissions per document.
///
/// A later submit for the same URI observes every earlier one: submissions
/// queue on a fair per-document mutex, so cookies come out in version
/// order for each (URI, part).
pub struct ParseQueue {
    /// Installed at initialize; absent before that and after shutdown.
    parser: Mutex<Option<Arc<dyn SyntaxParser>>>,
    locks: Mutex<FxHashMap<Url, Arc<tokio::sync::Mutex<()>>>>,
    stopped: AtomicBool,
}

impl ParseQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            parser: Mutex::new(None),
            locks: Mutex::new(FxHashMap::default()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn with_parser(parser: Arc<dyn SyntaxParser>) -> Arc<Self> {
        let queue = Self::new();
        queue.set_parser(parser);
        queue
    }

    pub fn set_parser(&self, parser: Arc<dyn SyntaxParser>) {
        *self.parser.lock().expect("parser slot") = Some(parser);
    }

    /// Parse the entry's current buffer and install the snapshot on the
    /// entry. Returns the cookie of the parse generation.
    pub async fn submit(&self, entry: &Arc<DocumentEntry>) -> Result<ParseCookie> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ServerError::Cancelled);
        }
        let Some(parser) = self.parser.lock().expect("parser slot").clone() else {
            return Err(ServerError::Cancelled);
        };

        let lock = self.document_lock(entry.uri());
        let _held = lock.lock().await;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ServerError::Cancelled);
        }

        let document = entry.document_snapshot().await;
        let snapshot = parser.parse(entry.uri(), &document)?;
        let cookie = snapshot.cookie.clone();
        entry.set_parse(snapshot).await;
        Ok(cookie)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn document_lock(&self, uri: &Url) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("parse lock map");
        locks.entry(uri.clone()).or_default().clone()
    }
}

/// Scheduling priority of an analysis item. Higher priorities drain first;
/// within one priority the queue is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPriority {
    High,
    Normal,
    Low,
}

impl AnalysisPriority {
    fn index(self) -> usize {
        match self {
            AnalysisPriority::High => 0,
            AnalysisPriority::Normal => 1,
            AnalysisPriority::Low => 2,
        }
    }
}

/// Work the queue's worker performs per item.
#[async_trait::async_trait]
pub trait AnalysisHandler: Send + Sync {
    async fn analyze(&self, entry: Arc<DocumentEntry>);

    /// Invoked for items still queued when the queue shuts down.
    async fn cancelled(&self, entry: Arc<DocumentEntry>);
}

struct QueueItem {
    entry: Arc<DocumentEntry>,
    _pending: CounterGuard,
}

struct QueueShared {
    queues: Mutex<[VecDeque<QueueItem>; 3]>,
    wake: Notify,
    pending: Arc<VolatileCounter>,
    stopped: AtomicBool,
    panics: mpsc::UnboundedSender<String>,
}

impl QueueShared {
    fn pop(&self) -> Option<QueueItem> {
        let mut queues = self.queues.lock().expect("analysis queues");
        queues.iter_mut().find_map(VecDeque::pop_front)
    }

    fn queued_len(&self) -> usize {
        let queues = self.queues.lock().expect("analysis queues");
        queues.iter().map(VecDeque::len).sum()
    }
}

/// Priority FIFO for analyzable entries, drained by one worker task.
pub struct AnalysisQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisQueue {
    /// Spawn the worker. The returned receiver yields one message per
    /// unhandled panic escaping the handler.
    pub fn new(
        handler: Arc<dyn AnalysisHandler>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (panic_tx, panic_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            queues: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
            wake: Notify::new(),
            pending: VolatileCounter::new(),
            stopped: AtomicBool::new(false),
            panics: panic_tx,
        });

        let worker = tokio::spawn(Self::run_worker(Arc::clone(&shared), handler));
        (
            Arc::new(Self {
                shared,
                worker: Mutex::new(Some(worker)),
            }),
            panic_rx,
        )
    }

    /// Number of items waiting to be drained.
    pub fn count(&self) -> usize {
        self.shared.queued_len()
    }

    pub fn enqueue(&self, entry: Arc<DocumentEntry>, priority: AnalysisPriority) {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return;
        }
        let item = QueueItem {
            entry,
            _pending: self.shared.pending.increment(),
        };
        {
            let mut queues = self.shared.queues.lock().expect("analysis queues");
            queues[priority.index()].push_back(item);
        }
        self.shared.wake.notify_one();
    }

    /// Completes when every enqueued item has been handled.
    pub async fn wait_for_complete(&self) {
        self.shared.pending.wait_for_zero().await;
    }

    /// Stop accepting work and cancel whatever is still queued.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        let worker = self.worker.lock().expect("worker handle").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    async fn run_worker(shared: Arc<QueueShared>, handler: Arc<dyn AnalysisHandler>) {
        loop {
            if shared.stopped.load(Ordering::SeqCst) {
                while let Some(item) = shared.pop() {
                    handler.cancelled(item.entry.clone()).await;
                }
                return;
            }

            match shared.pop() {
                Some(item) => {
                    let work = handler.analyze(item.entry.clone());
                    if let Err(payload) = AssertUnwindSafe(work).catch_unwind().await {
                        debug_assert!(false, "analysis handler panicked");
                        let message = panic_message(payload);
                        warn!(target: "pyls::analysis", "unhandled analysis panic: {message}");
                        let _ = shared.panics.send(message);
                    }
                }
                None => {
                    let notified = shared.wake.notified();
                    if shared.stopped.load(Ordering::SeqCst) || shared.queued_len() > 0 {
                        continue;
                    }
                    notified.await;
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "analysis task panicked".to_string()
    }
}
