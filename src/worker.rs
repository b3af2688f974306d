//! Fetch-and-archive worker loop
//!
//! Pops one repository at a time, fetches what the archive lacks and
//! records it. Any error ends the loop; the queue is the retry mechanism.

use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::blob::BlobStore;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::model::{repo_url, PackRef, WorkItem, DEFAULT_HOST};
use crate::protocol::{FetchClient, PackOutcome, ProgressMode};
use crate::repository::{ArchiveStore, NewFetch, WorkQueue};
use crate::schedule::{Schedule, WeekSchedule};
use crate::util::{format_duration, format_size};

/// Wait while the schedule forbids work
pub const SCHEDULE_SLEEP: Duration = Duration::from_secs(5 * 60);
/// Wait after popping an empty queue
pub const EMPTY_QUEUE_SLEEP: Duration = Duration::from_secs(30);

/// Sleep for `duration` unless `token` is cancelled first
///
/// Returns true when the sleep was cut short.
pub async fn interruptible_sleep(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// What one work unit produced
#[derive(Debug, Clone)]
pub struct FetchSummary {
    pub pack_id: i64,
    pub pack_ref: PackRef,
    pub bytes_fetched: u64,
}

pub struct Fetcher<Q, I> {
    queue: Q,
    index: I,
    blobs: Arc<dyn BlobStore>,
    client: FetchClient,
    schedule: Box<dyn Schedule>,
    metrics: Arc<Metrics>,
    host: String,
    progress: ProgressMode,
    token: CancellationToken,
    schedule_sleep: Duration,
    empty_queue_sleep: Duration,
}

impl<Q: WorkQueue, I: ArchiveStore> Fetcher<Q, I> {
    pub fn new(queue: Q, index: I, blobs: Arc<dyn BlobStore>, client: FetchClient) -> Self {
        let metrics = Arc::new(Metrics::new());
        Self {
            queue,
            index,
            blobs,
            client: client.with_metrics(metrics.clone()),
            schedule: Box::new(WeekSchedule::always()),
            metrics,
            host: DEFAULT_HOST.to_string(),
            progress: ProgressMode::Spinner,
            token: CancellationToken::new(),
            schedule_sleep: SCHEDULE_SLEEP,
            empty_queue_sleep: EMPTY_QUEUE_SLEEP,
        }
    }

    pub fn with_schedule(mut self, schedule: impl Schedule + 'static) -> Self {
        self.schedule = Box::new(schedule);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_progress(mut self, progress: ProgressMode) -> Self {
        self.progress = progress;
        self
    }

    /// Cancelling `token` stops the loop at the next iteration and cuts
    /// any pending sleep short. A fetch in flight is left to finish.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Override the quiet-period and empty-queue waits (used by tests)
    pub fn with_sleeps(mut self, schedule: Duration, empty_queue: Duration) -> Self {
        self.schedule_sleep = schedule;
        self.empty_queue_sleep = empty_queue;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Run until cancelled or until any unit of work fails
    pub async fn run(&self) -> Result<()> {
        info!(host = %self.host, "worker started");
        while !self.token.is_cancelled() {
            if !self.schedule.permits(OffsetDateTime::now_utc()) {
                self.metrics.sleep.inc();
                debug!("outside schedule, sleeping");
                interruptible_sleep(&self.token, self.schedule_sleep).await;
                continue;
            }

            let Some(item) = self.queue.pop().await? else {
                self.metrics.emptyqueue.inc();
                interruptible_sleep(&self.token, self.empty_queue_sleep).await;
                continue;
            };

            self.fetch_one(&item).await?;
        }
        info!("worker stopped");
        Ok(())
    }

    /// Fetch one repository and record the result in the index
    pub async fn fetch_one(&self, item: &WorkItem) -> Result<FetchSummary> {
        self.metrics.fetches.inc();

        let url = repo_url(&self.host, &item.name);
        let parent_url = item.parent.as_deref().map(|p| repo_url(&self.host, p));
        let haves = self.index.get_haves(&url, parent_url.as_deref()).await?;

        if haves.is_clone() {
            self.metrics.new.inc();
        }
        let fork = match &item.parent {
            Some(parent) => {
                self.metrics.forks.inc();
                format!(" (fork of {parent})")
            }
            None => String::new(),
        };
        let verb = if haves.is_clone() { "Cloning" } else { "Fetching" };
        info!("{verb} {}{fork}...", item.name);

        let start = Instant::now();
        let progress = self.progress.sink(&item.name);
        let outcome = self
            .client
            .fetch(&url, &haves.oids, self.blobs.as_ref(), progress.as_ref())
            .await?;

        let (pack_ref, bytes_fetched) = match outcome.pack {
            PackOutcome::Stored { pack_ref, bytes_fetched } => {
                let elapsed = start.elapsed();
                self.metrics.fetchtime.add(elapsed.as_nanos() as u64);
                info!(
                    "Got {} refs, {} in {}.",
                    outcome.refs.len(),
                    format_size(bytes_fetched),
                    format_duration(elapsed)
                );
                (pack_ref, bytes_fetched)
            }
            PackOutcome::Empty => {
                self.metrics.emptypack.inc();
                info!("Got {} refs and an empty pack.", outcome.refs.len());
                (PackRef::empty(&url, OffsetDateTime::now_utc()), 0)
            }
        };

        let pack_id = self
            .index
            .add_fetch(&NewFetch {
                name: &url,
                parent: parent_url.as_deref().unwrap_or_default(),
                timestamp: OffsetDateTime::now_utc(),
                refs: &outcome.refs,
                pack_ref: &pack_ref,
                deps: &haves.deps,
            })
            .await?;

        Ok(FetchSummary {
            pack_id,
            pack_ref,
            bytes_fetched,
        })
    }
}
