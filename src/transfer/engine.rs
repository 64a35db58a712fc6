//! Transfer orchestration.
//!
//! [`TransferEngine`] drives each transfer through
//! `queued -> downloading -> {paused, completed, error}` over a
//! [`TransferClient`]. Every active transfer owns two tasks:
//!
//! - a sampler that reads counters every `sample_interval` and persists them
//! - an event pump that applies client events (metadata, done, error)
//!
//! Both are registered per id and are awaited when stopped, so once
//! `pause` or `cancel` returns nothing writes to the record behind its back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::client::{
    AddedTransfer, ClientConnector, ClientEvent, ReadyConnector, TransferClient, TransferHandle,
    TransferSample,
};
use super::locator::augment_locator;
use super::publisher::{ProgressPublisher, TransferEvent};
use super::record::{NewTransfer, Transfer, TransferStatus};
use super::store::TransferStore;
use super::TransferError;

/// Default interval between progress samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Highest progress a sample may report; 100 is reserved for completion.
const MAX_SAMPLED_PROGRESS: f64 = 99.9;

/// Tunables for [`TransferEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Interval between progress samples.
    pub sample_interval: Duration,
    /// Directory the client writes payloads into.
    pub download_dir: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

/// Converts a completed fraction to a percentage with one decimal, below 100.
fn sampled_percent(fraction: f64) -> f64 {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((fraction * 1000.0).round() / 10.0).min(MAX_SAMPLED_PROGRESS)
}

struct Sampler {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sampler {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(error) = self.task.await
            && error.is_panic()
        {
            warn!(error = %error, "sampler task panicked");
        }
    }
}

/// Registry entry for a transfer that has a live client handle.
struct ActiveTransfer {
    handle: Arc<dyn TransferHandle>,
    sampler: Mutex<Option<Sampler>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveTransfer {
    fn new(handle: Arc<dyn TransferHandle>) -> Self {
        Self {
            handle,
            sampler: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    async fn stop_sampler(&self) {
        let sampler = self.sampler.lock().await.take();
        if let Some(sampler) = sampler {
            sampler.stop().await;
        }
    }

    /// Must not be called from the pump task itself.
    async fn stop_pump(&self) {
        let pump = self.pump.lock().await.take();
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }
    }

    async fn shutdown(&self, destroy: bool) {
        self.stop_sampler().await;
        self.stop_pump().await;
        if destroy && let Err(error) = self.handle.destroy().await {
            warn!(error = %error, "failed to remove transfer from client");
        }
    }
}

struct EngineInner {
    store: TransferStore,
    publisher: ProgressPublisher,
    connector: Arc<dyn ClientConnector>,
    client: OnceCell<Arc<dyn TransferClient>>,
    active: DashMap<String, Arc<ActiveTransfer>>,
    options: EngineOptions,
}

/// Outcome of one sampler tick.
enum Tick {
    Continue,
    Finished,
}

/// Runs transfers over a [`TransferClient`] and keeps their records current.
///
/// Cheap to clone; clones share the registry and the client.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

impl TransferEngine {
    /// Creates an engine that connects to its client on first use.
    #[must_use]
    pub fn new(
        store: TransferStore,
        publisher: ProgressPublisher,
        connector: Arc<dyn ClientConnector>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                publisher,
                connector,
                client: OnceCell::new(),
                active: DashMap::new(),
                options,
            }),
        }
    }

    /// Creates an engine over an already-built client.
    #[must_use]
    pub fn with_client(
        store: TransferStore,
        publisher: ProgressPublisher,
        client: Arc<dyn TransferClient>,
        options: EngineOptions,
    ) -> Self {
        Self::new(store, publisher, Arc::new(ReadyConnector(client)), options)
    }

    /// The publisher events are sent to.
    #[must_use]
    pub fn publisher(&self) -> &ProgressPublisher {
        &self.inner.publisher
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &TransferStore {
        &self.inner.store
    }

    /// Whether `id` has a live client handle.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.inner.active.contains_key(id)
    }

    /// Starts (or restarts) a transfer.
    ///
    /// Idempotent on `id`: an existing record is overwritten and a previous
    /// live handle is torn down first. Returns once the client has answered;
    /// progress arrives through the publisher.
    ///
    /// A locator the client rejects is not an error here: the returned record
    /// is in `error` status and a [`TransferEvent::Error`] is published.
    ///
    /// # Errors
    ///
    /// - [`TransferError::ClientUnavailable`] if the client cannot be initialized
    /// - [`TransferError::Store`] if the record cannot be written
    #[instrument(skip(self, locator))]
    pub async fn add(&self, id: &str, locator: &str, name: &str) -> Result<Transfer, TransferError> {
        let client = self.inner.client().await?;

        if let Some((_, previous)) = self.inner.active.remove(id) {
            info!("replacing existing transfer");
            previous.shutdown(true).await;
        }

        let locator = augment_locator(locator);
        self.inner
            .store
            .replace(&NewTransfer {
                id,
                name,
                resource_locator: &locator,
            })
            .await?;

        let transfer = match self.inner.activate(&client, id, &locator, false).await {
            Err(TransferError::Engine { .. }) => self.inner.record(id).await?,
            other => other?,
        };
        info!(status = %transfer.status, "transfer added");
        Ok(transfer)
    }

    /// Pauses an active transfer, keeping its progress.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotFound`] if `id` has no live handle
    /// - [`TransferError::InvalidTransition`] if the transfer is not downloading
    /// - [`TransferError::Engine`] if the client refuses
    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> Result<(), TransferError> {
        let entry = self.inner.entry(id)?;
        let current = self.inner.record(id).await?;
        match current.status {
            TransferStatus::Paused => return Ok(()),
            status if !status.can_transition_to(TransferStatus::Paused) => {
                return Err(TransferError::InvalidTransition {
                    id: id.to_string(),
                    from: status,
                    to: TransferStatus::Paused,
                });
            }
            _ => {}
        }

        entry.stop_sampler().await;
        if let Err(error) = entry.handle.pause().await {
            self.inner.start_sampler(id, &entry).await;
            return Err(TransferError::engine(id, error));
        }

        // Completion or failure may have landed while the client was pausing.
        let stored = self
            .inner
            .store
            .update(id, |t| {
                if t.status != TransferStatus::Downloading {
                    return false;
                }
                t.status = TransferStatus::Paused;
                t.download_speed = 0;
                t.upload_speed = 0;
                true
            })
            .await?
            .ok_or_else(|| TransferError::not_found(id))?;
        if stored.status != TransferStatus::Paused {
            return Err(TransferError::InvalidTransition {
                id: id.to_string(),
                from: stored.status,
                to: TransferStatus::Paused,
            });
        }
        info!("transfer paused");
        Ok(())
    }

    /// Resumes a paused or failed transfer.
    ///
    /// Resuming a transfer that is already downloading only makes sure its
    /// sampler is running.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotFound`] if `id` has no live handle
    /// - [`TransferError::InvalidTransition`] if the transfer is completed
    /// - [`TransferError::Engine`] if the client refuses
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> Result<(), TransferError> {
        let entry = self.inner.entry(id)?;
        let current = self.inner.record(id).await?;
        match current.status {
            TransferStatus::Downloading => {
                self.inner.start_sampler(id, &entry).await;
                return Ok(());
            }
            status if !status.can_transition_to(TransferStatus::Downloading) => {
                return Err(TransferError::InvalidTransition {
                    id: id.to_string(),
                    from: status,
                    to: TransferStatus::Downloading,
                });
            }
            _ => {}
        }

        entry
            .handle
            .resume()
            .await
            .map_err(|e| TransferError::engine(id, e))?;
        let stored = self
            .inner
            .store
            .update(id, |t| {
                if !matches!(t.status, TransferStatus::Paused | TransferStatus::Error) {
                    return false;
                }
                t.status = TransferStatus::Downloading;
                t.error = None;
                true
            })
            .await?
            .ok_or_else(|| TransferError::not_found(id))?;
        if stored.status != TransferStatus::Downloading {
            return Err(TransferError::InvalidTransition {
                id: id.to_string(),
                from: stored.status,
                to: TransferStatus::Downloading,
            });
        }
        self.inner.start_sampler(id, &entry).await;
        info!("transfer resumed");
        Ok(())
    }

    /// Stops a transfer and deletes its record.
    ///
    /// Removing the transfer from the client is best effort; failures are
    /// logged. A record without a live handle is simply deleted.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotFound`] if there is neither a handle nor a record
    /// - [`TransferError::Store`] if the delete fails
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<(), TransferError> {
        if let Some((_, entry)) = self.inner.active.remove(id) {
            entry.shutdown(true).await;
            self.inner.store.delete(id).await?;
            info!("transfer cancelled");
            return Ok(());
        }

        if self.inner.store.delete(id).await? {
            info!("inactive transfer record deleted");
            Ok(())
        } else {
            Err(TransferError::not_found(id))
        }
    }

    /// Snapshot of every stored transfer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Store`] if the read fails.
    pub async fn get_all(&self) -> Result<Vec<Transfer>, TransferError> {
        Ok(self.inner.store.get_all().await?)
    }

    /// Stored state of one transfer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Store`] if the read fails.
    pub async fn get(&self, id: &str) -> Result<Option<Transfer>, TransferError> {
        Ok(self.inner.store.get(id).await?)
    }

    /// Hands a stored transfer back to the client after a restart.
    ///
    /// Keeps the record's id, name and creation time. A paused record is
    /// re-added and immediately paused; anything else resumes downloading.
    /// Progress never moves backwards even if the client restarts from less.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotFound`] if no record exists
    /// - [`TransferError::InvalidTransition`] for completed transfers
    /// - [`TransferError::ClientUnavailable`] / [`TransferError::Engine`] on client failure
    #[instrument(skip(self))]
    pub async fn restore(&self, id: &str) -> Result<Transfer, TransferError> {
        let record = self.inner.record(id).await?;
        if self.is_active(id) {
            return Ok(record);
        }
        if matches!(
            record.status,
            TransferStatus::Completed | TransferStatus::Seeding
        ) {
            return Err(TransferError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: TransferStatus::Downloading,
            });
        }

        let client = self.inner.client().await?;
        let paused = record.status == TransferStatus::Paused;
        let transfer = self
            .inner
            .activate(&client, id, &record.resource_locator, paused)
            .await?;
        info!(status = %transfer.status, "transfer restored");
        Ok(transfer)
    }

    /// Restores every `queued` or `downloading` record. Returns restored ids.
    ///
    /// Individual failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Store`] if listing fails, or
    /// [`TransferError::ClientUnavailable`] if the client cannot be reached.
    #[instrument(skip(self))]
    pub async fn restore_active(&self) -> Result<Vec<String>, TransferError> {
        let records = self
            .inner
            .store
            .list_by_status(&[TransferStatus::Queued, TransferStatus::Downloading])
            .await?;

        let mut restored = Vec::with_capacity(records.len());
        for record in records {
            match self.restore(&record.id).await {
                Ok(_) => restored.push(record.id),
                Err(TransferError::ClientUnavailable(error)) => {
                    return Err(TransferError::ClientUnavailable(error));
                }
                Err(error) => warn!(id = %record.id, error = %error, "failed to restore transfer"),
            }
        }
        Ok(restored)
    }

    /// Stops all samplers and pumps without touching the client or records.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if let Some((_, entry)) = self.inner.active.remove(&id) {
                entry.shutdown(false).await;
            }
        }
        debug!("engine tasks stopped");
    }
}

impl EngineInner {
    async fn client(&self) -> Result<Arc<dyn TransferClient>, TransferError> {
        self.client
            .get_or_try_init(|| async {
                debug!("initializing transfer client");
                self.connector.connect().await
            })
            .await
            .map(Arc::clone)
            .map_err(TransferError::ClientUnavailable)
    }

    fn entry(&self, id: &str) -> Result<Arc<ActiveTransfer>, TransferError> {
        self.active
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransferError::not_found(id))
    }

    async fn record(&self, id: &str) -> Result<Transfer, TransferError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TransferError::not_found(id))
    }

    /// Hands `locator` to the client and registers the handle and its tasks.
    async fn activate(
        self: &Arc<Self>,
        client: &Arc<dyn TransferClient>,
        id: &str,
        locator: &str,
        paused: bool,
    ) -> Result<Transfer, TransferError> {
        if !paused {
            self.store
                .update(id, |t| {
                    t.status = TransferStatus::Downloading;
                    t.error = None;
                    t.download_speed = 0;
                    t.upload_speed = 0;
                    true
                })
                .await?
                .ok_or_else(|| TransferError::not_found(id))?;
        }

        let AddedTransfer { handle, events } =
            match client.add(locator, &self.options.download_dir).await {
                Ok(added) => added,
                Err(error) => {
                    self.record_error(id, error.to_string()).await;
                    return Err(TransferError::engine(id, error));
                }
            };

        if paused && let Err(error) = handle.pause().await {
            warn!(error = %error, "failed to pause restored transfer");
        }

        let entry = Arc::new(ActiveTransfer::new(handle));
        self.active.insert(id.to_string(), Arc::clone(&entry));
        if !paused {
            self.start_sampler(id, &entry).await;
        }
        let pump = tokio::spawn(pump_events(Arc::clone(self), id.to_string(), events));
        *entry.pump.lock().await = Some(pump);

        self.record(id).await
    }

    /// Starts the sampler unless one is already running.
    async fn start_sampler(self: &Arc<Self>, id: &str, entry: &ActiveTransfer) {
        let mut slot = entry.sampler.lock().await;
        if slot.as_ref().is_some_and(Sampler::is_running) {
            return;
        }
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_sampler(
            Arc::clone(self),
            id.to_string(),
            Arc::clone(&entry.handle),
            stop_rx,
        ));
        *slot = Some(Sampler { stop, task });
    }

    fn active_entry(&self, id: &str) -> Option<Arc<ActiveTransfer>> {
        self.active.get(id).map(|entry| Arc::clone(entry.value()))
    }

    async fn sample_once(&self, id: &str, handle: &dyn TransferHandle) -> Tick {
        let sample: TransferSample = match handle.sample().await {
            Ok(sample) => sample,
            Err(error) => {
                debug!(id, error = %error, "sample failed");
                return Tick::Continue;
            }
        };
        let percent = sampled_percent(sample.fraction);

        let updated = self
            .store
            .update(id, |t| {
                if t.status != TransferStatus::Downloading {
                    return false;
                }
                t.progress = t.progress.max(percent);
                t.downloaded = sample.downloaded;
                if sample.total_size > 0 {
                    t.total_size = sample.total_size;
                }
                t.download_speed = sample.download_speed;
                t.upload_speed = sample.upload_speed;
                t.peers = sample.peers;
                true
            })
            .await;

        match updated {
            Ok(Some(t)) if t.status == TransferStatus::Downloading => {
                self.publisher.publish(TransferEvent::Progress {
                    eta: t.eta_secs(),
                    id: t.id,
                    progress: t.progress,
                    download_speed: t.download_speed,
                    upload_speed: t.upload_speed,
                    downloaded: t.downloaded,
                    total_size: t.total_size,
                    peers: t.peers,
                    seeds: sample.seeds,
                });
            }
            Ok(Some(_)) => {}
            Ok(None) => return Tick::Finished,
            Err(error) => warn!(id, error = %error, "failed to persist sample"),
        }

        if sample.done {
            Tick::Finished
        } else {
            Tick::Continue
        }
    }

    async fn on_metadata(
        &self,
        id: &str,
        name: Option<String>,
        total_size: u64,
        save_path: Option<String>,
    ) {
        let result = self
            .store
            .update(id, |t| {
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    t.name = name;
                }
                if total_size > 0 {
                    t.total_size = total_size;
                }
                if save_path.is_some() {
                    t.save_path = save_path;
                }
                true
            })
            .await;
        match result {
            Ok(Some(t)) => debug!(id, name = %t.name, total_size = t.total_size, "metadata received"),
            Ok(None) => {}
            Err(error) => warn!(id, error = %error, "failed to persist metadata"),
        }
    }

    async fn on_done(&self, id: &str, save_path: Option<String>) {
        let entry = self.active_entry(id);
        if let Some(entry) = &entry {
            entry.stop_sampler().await;
        }

        let result = self
            .store
            .update(id, |t| {
                if t.status == TransferStatus::Completed {
                    return false;
                }
                t.status = TransferStatus::Completed;
                t.progress = 100.0;
                t.downloaded = t.downloaded.max(t.total_size);
                t.download_speed = 0;
                t.upload_speed = 0;
                t.error = None;
                if save_path.is_some() {
                    t.save_path = save_path;
                }
                true
            })
            .await;

        match result {
            Ok(Some(t)) => {
                info!(id, save_path = ?t.save_path, "transfer completed");
                self.publisher.publish(TransferEvent::Completed {
                    id: t.id,
                    save_path: t.save_path,
                });
            }
            Ok(None) => debug!(id, "completed transfer has no record"),
            Err(error) => warn!(id, error = %error, "failed to persist completion"),
        }

        if let Some(entry) = entry {
            self.active
                .remove_if(id, |_, current| Arc::ptr_eq(current, &entry));
        }
    }

    async fn on_error(&self, id: &str, message: String) {
        if let Some(entry) = self.active_entry(id) {
            entry.stop_sampler().await;
        }
        self.record_error(id, message).await;
    }

    async fn record_error(&self, id: &str, message: String) {
        warn!(id, error = %message, "transfer failed");
        let stored = message.clone();
        let result = self
            .store
            .update(id, |t| {
                if t.status == TransferStatus::Completed {
                    return false;
                }
                t.status = TransferStatus::Error;
                t.error = Some(stored);
                t.download_speed = 0;
                t.upload_speed = 0;
                true
            })
            .await;
        match result {
            Ok(Some(t)) if t.status == TransferStatus::Error => {
                self.publisher.publish(TransferEvent::Error {
                    id: id.to_string(),
                    message,
                });
            }
            Ok(_) => {}
            Err(error) => warn!(id, error = %error, "failed to persist transfer error"),
        }
    }
}

async fn run_sampler(
    inner: Arc<EngineInner>,
    id: String,
    handle: Arc<dyn TransferHandle>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(inner.options.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }
        if let Tick::Finished = inner.sample_once(&id, handle.as_ref()).await {
            debug!(id = %id, "sampler observed end of transfer");
            break;
        }
    }
}

async fn pump_events(
    inner: Arc<EngineInner>,
    id: String,
    mut events: mpsc::Receiver<ClientEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Metadata {
                name,
                total_size,
                save_path,
            } => inner.on_metadata(&id, name, total_size, save_path).await,
            ClientEvent::Done { save_path } => {
                inner.on_done(&id, save_path).await;
                break;
            }
            ClientEvent::Error { message } => inner.on_error(&id, message).await,
        }
    }
    debug!(id = %id, "event pump finished");
}
