//! The pool watcher control loop.
//!
//! A single task owns all bookkeeping: it discovers and stages inbox entries,
//! submits staged items to a bounded pool of item tasks, reaps finished tasks
//! without blocking, and reports status. It never awaits a remote call
//! itself; item tasks do that through the [`Processor`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::item::{ItemState, QueueItem};
use super::staging::{QueueDirs, validate_entry};
use super::{QueueError, io_error};
use crate::processor::{ItemReport, Processor};
use crate::remote::Completer;

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Quiet time after which an info-level status line is logged.
    pub status_delay: Duration,
    /// Sleep between two passes.
    pub refresh_delay: Duration,
    /// Re-admit files left in the cache by an earlier run.
    pub reload_cache: bool,
    /// `None` runs every item at once.
    pub max_concurrent_items: Option<usize>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            status_delay: Duration::from_secs(60),
            refresh_delay: Duration::from_secs(1),
            reload_cache: true,
            max_concurrent_items: None,
        }
    }
}

/// Aggregate counters of the pool.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub submitted_count: u64,
    /// Submitted but not yet finished.
    pub queued_count: usize,
    pub completed_count: u64,
    pub total_errors: usize,
    pub last_report_time: Instant,
}

impl PoolStatus {
    fn new() -> Self {
        Self {
            submitted_count: 0,
            queued_count: 0,
            completed_count: 0,
            total_errors: 0,
            last_report_time: Instant::now(),
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s) in queue, completed {} file(s) with {} error(s)",
            self.queued_count, self.completed_count, self.total_errors
        )
    }
}

/// What an item task hands back to the watcher.
struct ItemOutcome {
    item: QueueItem,
    result: Result<ItemReport, QueueError>,
}

pub struct Watcher<C> {
    dirs: QueueDirs,
    processor: Processor<C>,
    settings: WatcherSettings,
    semaphore: Option<Arc<Semaphore>>,
    tasks: JoinSet<ItemOutcome>,
    /// Task id → item name, for items still in the pool.
    running: HashMap<Id, String>,
    /// Staged items waiting for submission.
    pending: Vec<QueueItem>,
    invalid: HashSet<String>,
    next_sequence_id: u64,
    status: PoolStatus,
}

impl<C: Completer> Watcher<C> {
    pub fn new(dirs: QueueDirs, processor: Processor<C>, settings: WatcherSettings) -> Self {
        Self {
            semaphore: settings
                .max_concurrent_items
                .map(|n| Arc::new(Semaphore::new(n))),
            dirs,
            processor,
            settings,
            tasks: JoinSet::new(),
            running: HashMap::new(),
            pending: Vec::new(),
            invalid: HashSet::new(),
            next_sequence_id: 0,
            status: PoolStatus::new(),
        }
    }

    pub fn status(&self) -> &PoolStatus {
        &self.status
    }

    pub fn dirs(&self) -> &QueueDirs {
        &self.dirs
    }

    /// Inbox entries currently known to be invalid.
    pub fn invalid_entries(&self) -> &HashSet<String> {
        &self.invalid
    }

    /// Create the directories and pick up what an earlier run left in the
    /// cache.
    pub async fn start(&mut self) -> Result<(), QueueError> {
        info!(root = %self.dirs.root.display(), "watching pool directory");
        info!(input = %self.dirs.inbox.display(), output = %self.dirs.outbox.display(), "drop files in the input directory");
        self.dirs.create().await?;

        let residual = self.dirs.residual_entries().await?;
        if residual.is_empty() {
            return Ok(());
        }
        warn!(
            entries = ?residual,
            "cache is not empty, these entries are safe to delete if they are not reloaded"
        );
        if !self.settings.reload_cache {
            return Ok(());
        }

        info!(count = residual.len(), "reloading cached files");
        for name in residual {
            match validate_entry(&self.dirs.cached(&name)).await {
                Ok(_) => self.pending.push(QueueItem::recovered(name)),
                Err(reason) => warn!(entry = %name, %reason, "invalid file in cache, please remove it"),
            }
        }
        Ok(())
    }

    /// One round of the control loop: status, discovery, submission and
    /// reaping. Never blocks on running items.
    pub async fn pass(&mut self) -> Result<(), QueueError> {
        if self.status.last_report_time.elapsed() > self.settings.status_delay {
            info!("Status: {}", self.status);
            self.status.last_report_time = Instant::now();
        }

        self.discover().await?;
        let new_items = self.submit_pending()?;
        if new_items > 0 {
            debug!(new_items, "Status: {}", self.status);
            self.status.last_report_time = Instant::now();
        }

        let mut new_errors = 0;
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            new_errors += self.handle_joined(joined)?;
        }
        if new_errors > 0 {
            debug!(new_errors, "Status: {}", self.status);
            self.status.last_report_time = Instant::now();
        }
        Ok(())
    }

    /// Wait for every submitted item.
    pub async fn drain(&mut self) -> Result<(), QueueError> {
        if !self.running.is_empty() {
            info!(count = self.running.len(), "waiting for files in queue");
        }
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.handle_joined(joined)?;
        }
        Ok(())
    }

    /// Run passes until `shutdown` is set, then drain.
    ///
    /// Returns the first item-level error; items still running are aborted
    /// when the watcher is dropped.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<PoolStatus, QueueError> {
        self.start().await?;
        loop {
            self.pass().await?;
            if shutdown.load(Ordering::Acquire) {
                info!("shutdown requested, no longer watching input directory");
                break;
            }
            tokio::time::sleep(self.settings.refresh_delay).await;
        }
        self.drain().await?;
        info!("Status: {}", self.status);
        Ok(self.status.clone())
    }

    async fn discover(&mut self) -> Result<(), QueueError> {
        let previous = std::mem::take(&mut self.invalid);
        for name in self.dirs.inbox_entries().await? {
            if previous.contains(&name) {
                self.invalid.insert(name);
                continue;
            }
            if let Err(reason) = validate_entry(&self.dirs.inbox.join(&name)).await {
                warn!(entry = %name, %reason, "invalid file, please remove it from the input directory");
                self.invalid.insert(name);
                continue;
            }

            self.admit(&name).await?;
        }
        Ok(())
    }

    /// Stage one inbox entry. An entry removed since it was listed is
    /// skipped.
    async fn admit(&mut self, name: &str) -> Result<(), QueueError> {
        let mut item = QueueItem::discovered(name);
        let staged = match self.dirs.stage(name).await {
            Ok(staged) => staged,
            Err(QueueError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                warn!(entry = %name, "file vanished from the input directory before staging");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        item.mark_staged(staged)?;
        self.pending.push(item);
        Ok(())
    }

    fn submit_pending(&mut self) -> Result<usize, QueueError> {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();

        for mut item in pending {
            let sequence_id = self.next_sequence_id;
            item.mark_queued(sequence_id)?;
            self.next_sequence_id += 1;

            let name = item.name();
            info!(original = %item.original_name, "pooling {name}");

            let processor = self.processor.clone();
            let dirs = self.dirs.clone();
            let semaphore = self.semaphore.clone();
            let handle = self.tasks.spawn(
                async move {
                    // Never closed; a failed acquire would only mean no bound.
                    let permit = match semaphore {
                        Some(s) => s.acquire_owned().await.ok(),
                        None => None,
                    };
                    let outcome = run_item(&processor, &dirs, item).await;
                    drop(permit);
                    outcome
                }
                .instrument(info_span!("item", sequence_id)),
            );
            self.running.insert(handle.id(), name);
            self.status.submitted_count += 1;
        }
        self.status.queued_count = self.running.len();
        Ok(count)
    }

    /// Book a finished item task. Returns the number of new SubTask errors.
    fn handle_joined(
        &mut self,
        joined: Result<(Id, ItemOutcome), JoinError>,
    ) -> Result<usize, QueueError> {
        let (id, outcome) = match joined {
            Ok(finished) => finished,
            Err(source) => {
                let item = self.running.remove(&source.id()).unwrap_or_default();
                error!(%item, error = %source, "item task panicked");
                return Err(QueueError::WorkerPanicked { item, source });
            }
        };
        self.running.remove(&id);
        self.status.queued_count = self.running.len();

        let name = outcome.item.name();
        let report = match outcome.result {
            Ok(report) => report,
            Err(e) => {
                error!(item = %name, error = %e, "item failed");
                return Err(e);
            }
        };

        let errors = report.errors.len();
        self.status.completed_count += 1;
        self.status.total_errors += errors;
        if errors > 0 {
            warn!(item = %name, errors, "delivered with errors");
        } else {
            info!(item = %name, "delivered");
        }
        Ok(errors)
    }
}

async fn run_item<C: Completer>(
    processor: &Processor<C>,
    dirs: &QueueDirs,
    mut item: QueueItem,
) -> ItemOutcome {
    let result = execute_item(processor, dirs, &mut item).await;
    ItemOutcome { item, result }
}

async fn execute_item<C: Completer>(
    processor: &Processor<C>,
    dirs: &QueueDirs,
    item: &mut QueueItem,
) -> Result<ItemReport, QueueError> {
    item.advance(ItemState::Running)?;
    let report = deliver(processor, dirs, item).await;
    let terminal = if report.is_ok() {
        ItemState::Completed
    } else {
        ItemState::Failed
    };
    item.advance(terminal)?;
    report
}

/// Process the cached copy into the outbox, then remove the cached copy.
async fn deliver<C: Completer>(
    processor: &Processor<C>,
    dirs: &QueueDirs,
    item: &QueueItem,
) -> Result<ItemReport, QueueError> {
    let name = item.name();
    let source = dirs.cached(&item.staged_name);
    let destination = dirs.delivered(&item.staged_name);

    let report = processor
        .process(&name, &source, &destination)
        .await
        .map_err(|source| QueueError::ItemFailed {
            item: name.clone(),
            source,
        })?;

    let delivered = tokio::fs::try_exists(&destination)
        .await
        .map_err(io_error("check", &destination))?;
    if !delivered {
        return Err(QueueError::NotDelivered {
            item: name,
            path: destination,
        });
    }
    tokio::fs::remove_file(&source)
        .await
        .map_err(io_error("remove", &source))?;
    Ok(report)
}
