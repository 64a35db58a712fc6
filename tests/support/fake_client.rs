//! Scriptable in-process transfer client.
//!
//! Tests drive counters with [`FakeHandle::set_fraction`] and push client
//! events with [`FakeHandle::emit`], then observe the engine through its
//! store and publisher.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gamegrab_core::transfer::{AddedTransfer, EVENT_CHANNEL_CAPACITY};
use gamegrab_core::{
    ClientConnector, ClientError, ClientEvent, TransferClient, TransferEvent, TransferHandle,
    TransferSample,
};
use tokio::sync::{broadcast, mpsc};

/// Total size every fake transfer reports.
pub const FAKE_TOTAL_SIZE: u64 = 1_000_000;

/// How long a scripted `pause` takes after emitting its event.
const SLOW_PAUSE: Duration = Duration::from_millis(200);

#[derive(Default)]
pub struct FakeClient {
    handles: Mutex<Vec<Arc<FakeHandle>>>,
    reject_adds: AtomicBool,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later `add` fail.
    pub fn reject_adds(&self) {
        self.reject_adds.store(true, Ordering::SeqCst);
    }

    pub fn handles(&self) -> Vec<Arc<FakeHandle>> {
        self.handles.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeHandle> {
        self.handles()
            .last()
            .cloned()
            .expect("no transfer was added to the fake client")
    }
}

#[async_trait]
impl TransferClient for FakeClient {
    async fn add(&self, locator: &str, _download_dir: &Path) -> Result<AddedTransfer, ClientError> {
        if self.reject_adds.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected {
                method: "add".to_string(),
                code: 1,
                message: "locator rejected".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = Arc::new(FakeHandle {
            locator: locator.to_string(),
            sample: Mutex::new(TransferSample {
                total_size: FAKE_TOTAL_SIZE,
                ..TransferSample::default()
            }),
            events: tx,
            paused: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            resumes: AtomicU32::new(0),
            pause_event: Mutex::new(None),
        });
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        Ok(AddedTransfer {
            handle,
            events: rx,
        })
    }
}

pub struct FakeHandle {
    pub locator: String,
    sample: Mutex<TransferSample>,
    events: mpsc::Sender<ClientEvent>,
    paused: AtomicBool,
    destroyed: AtomicBool,
    resumes: AtomicU32,
    pause_event: Mutex<Option<ClientEvent>>,
}

impl FakeHandle {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn set_fraction(&self, fraction: f64) {
        let mut sample = self.sample.lock().unwrap();
        sample.fraction = fraction;
        sample.downloaded = (FAKE_TOTAL_SIZE as f64 * fraction) as u64;
        sample.download_speed = 10_000;
        sample.peers = 3;
        sample.seeds = 1;
    }

    pub async fn emit(&self, event: ClientEvent) {
        self.events.send(event).await.expect("engine dropped the event receiver");
    }

    /// Makes the next `pause` emit `event` and then stall, as a slow backend would.
    pub fn emit_during_pause(&self, event: ClientEvent) {
        *self.pause_event.lock().unwrap() = Some(event);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> u32 {
        self.resumes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferHandle for FakeHandle {
    async fn sample(&self) -> Result<TransferSample, ClientError> {
        Ok(*self.sample.lock().unwrap())
    }

    async fn pause(&self) -> Result<(), ClientError> {
        let scripted = self.pause_event.lock().unwrap().take();
        if let Some(event) = scripted {
            self.emit(event).await;
            tokio::time::sleep(SLOW_PAUSE).await;
        }
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), ClientError> {
        self.paused.store(false, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that counts `connect` calls and hands out one shared client.
pub struct CountingConnector {
    client: Arc<FakeClient>,
    connects: AtomicU32,
}

impl CountingConnector {
    pub fn new(client: Arc<FakeClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            connects: AtomicU32::new(0),
        })
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientConnector for CountingConnector {
    async fn connect(&self) -> Result<Arc<dyn TransferClient>, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Keep the connection window open so concurrent callers overlap.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Arc::clone(&self.client) as Arc<dyn TransferClient>)
    }
}

const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Waits for the first event for `id` that satisfies `accept`.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<TransferEvent>,
    id: &str,
    accept: impl Fn(&TransferEvent) -> bool,
) -> TransferEvent {
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if event.id() == id && accept(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("publisher closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for transfer event")
}

/// Waits for a progress event for `id` at or above `percent`.
pub async fn wait_for_progress(
    events: &mut broadcast::Receiver<TransferEvent>,
    id: &str,
    percent: f64,
) -> f64 {
    let event = wait_for_event(events, id, |event| {
        matches!(event, TransferEvent::Progress { progress, .. } if *progress >= percent)
    })
    .await;
    match event {
        TransferEvent::Progress { progress, .. } => progress,
        other => panic!("expected progress event, got {other:?}"),
    }
}
