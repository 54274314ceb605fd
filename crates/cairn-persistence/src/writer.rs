//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
//! Per-object asynchronous file writers and the pool they run on.
//!
//! A [`MementoFileWriter`] owns one memento file. Submitted writes and deletes
//! are queued on an unbounded channel and applied strictly in submission order
//! by a task spawned on the [`WriterPool`]; writers for different files run
//! concurrently. Each write lands in `<id>.tmp` first and is renamed over the
//! destination once fully flushed, so a reader never observes a partial file.

use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cairn_logging::{cairn_debug, cairn_error, LogContext};
use parking_lot::{Condvar, Mutex};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::memento::{Category, Memento};
use crate::metrics::PersistenceMetrics;
use crate::serializer::MementoCodec;
use crate::store::MementoStore;
use crate::{PersistenceError, Result};

/// Multi-threaded runtime dedicated to memento writers.
///
/// The pool remembers every writer task it spawns. Shutting it down never
/// cancels a task: queued operations run to completion, past the grace window
/// if necessary.
pub struct WriterPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WriterPool {
    /// Start the pool; `None` uses one worker per core.
    pub fn new(worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name("cairn-memento-writer").enable_all();
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder
            .build()
            .map_err(|err| PersistenceError::WorkerPool(err.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Whether [`WriterPool::shutdown`] already ran.
    pub fn is_shut_down(&self) -> bool {
        self.runtime.lock().is_none()
    }

    /// Writer tasks spawned and not yet handed to shutdown.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    fn spawn<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = self.runtime.lock();
        if runtime.is_none() {
            return Err(PersistenceError::WorkerPool(
                "writer pool is shut down".into(),
            ));
        }
        self.tasks.lock().push(self.handle.spawn(task));
        Ok(())
    }

    /// Wait up to `grace` for every writer task to exit, then release the runtime.
    ///
    /// Tasks only exit once their writer is closed, so close writers first.
    /// Returns `false` when the grace window expired; the remaining tasks keep
    /// running on a detached thread that drops the runtime once they finish.
    /// Safe to call from inside another runtime. Subsequent calls return `true`.
    pub fn shutdown(&self, grace: Duration) -> Result<bool> {
        let (runtime, mut tasks) = {
            let mut runtime = self.runtime.lock();
            let Some(runtime) = runtime.take() else {
                return Ok(true);
            };
            (runtime, mem::take(&mut *self.tasks.lock()))
        };
        // `block_on` and dropping a runtime are both illegal from async context.
        let outcome = thread::Builder::new()
            .name("cairn-writer-shutdown".into())
            .spawn(move || {
                let drained = runtime.block_on(async {
                    tokio::time::timeout(grace, join_all(&mut tasks)).await.is_ok()
                });
                if drained {
                    Ok(true)
                } else {
                    finish_detached(runtime, tasks).map(|()| false)
                }
            })
            .map_err(|err| PersistenceError::WorkerPool(err.to_string()))?
            .join()
            .map_err(|_| PersistenceError::WorkerPool("shutdown thread panicked".into()))?;
        outcome
    }
}

async fn join_all(tasks: &mut Vec<JoinHandle<()>>) {
    while let Some(task) = tasks.last_mut() {
        if let Err(err) = task.await {
            cairn_error!(
                context = LogContext::new().with_operation("shutdown"),
                "memento writer task failed: {}",
                err
            );
        }
        tasks.pop();
    }
}

fn finish_detached(runtime: Runtime, mut tasks: Vec<JoinHandle<()>>) -> Result<()> {
    thread::Builder::new()
        .name("cairn-writer-drain".into())
        .spawn(move || {
            let remaining = tasks.len();
            runtime.block_on(join_all(&mut tasks));
            cairn_debug!(
                context = LogContext::new().with_operation("shutdown"),
                "{} memento writers drained after the grace window",
                remaining
            );
        })
        .map(drop)
        .map_err(|err| PersistenceError::WorkerPool(err.to_string()))
}

impl Drop for WriterPool {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.get_mut().take() else {
            return;
        };
        let tasks = mem::take(self.tasks.get_mut());
        if let Err(err) = finish_detached(runtime, tasks) {
            cairn_error!(
                context = LogContext::new().with_operation("shutdown"),
                "queued memento writes abandoned: {}",
                err
            );
        }
    }
}

impl fmt::Debug for WriterPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterPool")
            .field("shut_down", &self.is_shut_down())
            .field("tasks", &self.task_count())
            .finish()
    }
}

enum WriteOp {
    Write(Memento),
    Delete,
}

impl WriteOp {
    fn name(&self) -> &'static str {
        match self {
            WriteOp::Write(_) => "write",
            WriteOp::Delete => "delete",
        }
    }
}

struct WriterShared {
    category: Category,
    id: String,
    node: Option<Arc<str>>,
    path: PathBuf,
    temp_path: PathBuf,
    pending: Mutex<usize>,
    idle: Condvar,
    failures: AtomicU64,
    last_failure: Mutex<Option<String>>,
}

impl WriterShared {
    fn context(&self, operation: &'static str) -> LogContext<'_> {
        LogContext::memento(self.category.dir_name(), &self.id)
            .with_node(self.node.as_deref())
            .with_operation(operation)
    }

    fn complete_one(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    async fn write(&self, codec: &dyn MementoCodec, memento: &Memento) -> Result<()> {
        // Encode before touching disk so a failure leaves the previous file intact.
        let text = codec.encode(memento)?;
        if let Err(err) = self.replace(text.as_bytes()).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        Ok(())
    }

    async fn replace(&self, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(&self.temp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&self.temp_path, &self.path).await?;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                cairn_debug!(context = self.context("delete"), "memento file already absent");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record_failure(&self, operation: &'static str, err: &PersistenceError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(err.to_string());
        cairn_error!(
            context = self.context(operation),
            "memento {} failed: {}",
            operation,
            err
        );
    }
}

/// Serialises all writes and deletes for one memento file.
pub struct MementoFileWriter {
    shared: Arc<WriterShared>,
    sender: Mutex<Option<mpsc::UnboundedSender<WriteOp>>>,
}

impl MementoFileWriter {
    /// Spawn the writer task for `category/id` on `pool`.
    ///
    /// `node` names the controller in every log event the writer emits.
    pub fn spawn(
        pool: &WriterPool,
        store: &MementoStore,
        category: Category,
        id: impl Into<String>,
        codec: Arc<dyn MementoCodec>,
        metrics: Arc<PersistenceMetrics>,
        node: Option<Arc<str>>,
    ) -> Result<Self> {
        let id = id.into();
        let shared = Arc::new(WriterShared {
            category,
            path: store.path_for(category, &id)?,
            temp_path: store.temp_path_for(category, &id)?,
            id,
            node,
            pending: Mutex::new(0),
            idle: Condvar::new(),
            failures: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        });
        let (sender, mut receiver) = mpsc::unbounded_channel::<WriteOp>();

        let task = shared.clone();
        pool.spawn(async move {
            // Ends once the writer is closed and the queue is empty.
            while let Some(op) = receiver.recv().await {
                let operation = op.name();
                let outcome = match &op {
                    WriteOp::Write(memento) => task.write(codec.as_ref(), memento).await,
                    WriteOp::Delete => task.delete().await,
                };
                match outcome {
                    Ok(()) => match op {
                        WriteOp::Write(_) => metrics.record_write(task.category),
                        WriteOp::Delete => metrics.record_delete(task.category),
                    },
                    Err(err) => {
                        metrics.record_failure(task.category, operation);
                        task.record_failure(operation, &err);
                    }
                }
                task.complete_one();
            }
            cairn_debug!(context = task.context("close"), "memento writer exited");
        })?;

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Queue a replacement of the file with `memento`.
    pub fn write(&self, memento: Memento) -> Result<()> {
        self.enqueue(WriteOp::Write(memento))
    }

    /// Queue removal of the file; a missing file counts as success.
    pub fn delete(&self) -> Result<()> {
        self.enqueue(WriteOp::Delete)
    }

    /// Refuse further operations. Already queued ones still run, after which the task exits.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    fn enqueue(&self, op: WriteOp) -> Result<()> {
        let sender = self.sender.lock();
        if let Some(sender) = sender.as_ref() {
            *self.shared.pending.lock() += 1;
            if sender.send(op).is_ok() {
                return Ok(());
            }
            self.shared.complete_one();
        }
        Err(PersistenceError::WriterClosed {
            category: self.shared.category,
            id: self.shared.id.clone(),
        })
    }

    /// Block until every operation queued so far has been applied.
    pub fn wait_for_write_completed(&self, timeout: Duration) -> Result<()> {
        self.wait_until(Instant::now().checked_add(timeout), timeout)
    }

    /// Like [`MementoFileWriter::wait_for_write_completed`] against a shared deadline.
    ///
    /// `timeout` is only reported in the error; `None` waits indefinitely.
    pub fn wait_until(&self, deadline: Option<Instant>, timeout: Duration) -> Result<()> {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            match deadline {
                Some(deadline) => {
                    if self.shared.idle.wait_until(&mut pending, deadline).timed_out()
                        && *pending > 0
                    {
                        return Err(PersistenceError::Timeout {
                            category: self.shared.category,
                            id: self.shared.id.clone(),
                            timeout,
                        });
                    }
                }
                None => self.shared.idle.wait(&mut pending),
            }
        }
        Ok(())
    }

    /// Operations queued but not yet applied.
    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    /// Number of operations that failed and were skipped.
    pub fn failure_count(&self) -> u64 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Message of the most recent failure, if any.
    pub fn last_failure(&self) -> Option<String> {
        self.shared.last_failure.lock().clone()
    }

    /// Whether the writer no longer accepts work.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .map_or(true, mpsc::UnboundedSender::is_closed)
    }

    /// Category of the owned file.
    pub fn category(&self) -> Category {
        self.shared.category
    }

    /// Memento id of the owned file.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Controller named in this writer's log events.
    pub fn node(&self) -> Option<&str> {
        self.shared.node.as_deref()
    }

    /// Destination path of the owned file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl fmt::Debug for MementoFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MementoFileWriter")
            .field("category", &self.shared.category)
            .field("id", &self.shared.id)
            .field("pending", &self.pending())
            .finish()
    }
}
