//! aria2 JSON-RPC backend.
//!
//! aria2 does the BitTorrent work; this module only speaks its RPC. A magnet
//! first downloads metadata under one GID, then aria2 continues the payload
//! under a second GID listed in `followedBy`. Handles follow that hop
//! transparently and the watcher reports it as a [`ClientEvent::Metadata`].
//!
//! Downloads are added with `seed-time=0`. aria2 outlives this process, so
//! adding a magnet whose info hash aria2 already holds (paused or queued by
//! an earlier run) re-attaches to that GID instead of adding a duplicate.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, instrument, warn};

use super::client::{
    AddedTransfer, ClientConnector, ClientError, ClientEvent, EVENT_CHANNEL_CAPACITY,
    TransferClient, TransferHandle, TransferSample,
};
use crate::http_client::build_http_client;
use crate::user_agent::default_rpc_user_agent;

/// Default aria2 RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:6800/jsonrpc";

/// How often the watcher polls a transfer's status.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on `followedBy` hops in one status read.
const MAX_FOLLOW_HOPS: usize = 4;

/// How many queued downloads are searched when re-attaching by info hash.
const WAITING_LOOKUP_LIMIT: u32 = 1000;

const STATUS_KEYS: [&str; 13] = [
    "gid",
    "status",
    "seeder",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "uploadSpeed",
    "connections",
    "numSeeders",
    "followedBy",
    "errorMessage",
    "dir",
    "bittorrent",
];

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct VersionReply {
    version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EntryReply {
    gid: String,
    info_hash: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatusReply {
    status: String,
    seeder: String,
    total_length: String,
    completed_length: String,
    download_speed: String,
    upload_speed: String,
    connections: String,
    num_seeders: String,
    followed_by: Vec<String>,
    error_message: Option<String>,
    dir: Option<String>,
    bittorrent: Option<BittorrentReply>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BittorrentReply {
    info: Option<InfoReply>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InfoReply {
    name: String,
}

fn number<T: std::str::FromStr + Default>(value: &str) -> T {
    value.parse().unwrap_or_default()
}

/// Lowercase hex info hash of a magnet locator, if it carries one.
fn info_hash(locator: &str) -> Option<String> {
    let (_, query) = locator.strip_prefix("magnet:")?.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("xt=urn:btih:"))
        .filter(|hash| hash.len() == 40 && hash.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(str::to_ascii_lowercase)
}

impl StatusReply {
    fn torrent_name(&self) -> Option<&str> {
        self.bittorrent
            .as_ref()
            .and_then(|bt| bt.info.as_ref())
            .map(|info| info.name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// A magnet's first GID carries no info dictionary yet.
    fn is_metadata_only(&self) -> bool {
        self.bittorrent.is_some() && self.torrent_name().is_none()
    }

    fn save_path(&self) -> Option<String> {
        let dir = self.dir.as_deref()?;
        Some(match self.torrent_name() {
            Some(name) => format!("{}/{name}", dir.trim_end_matches('/')),
            None => dir.to_string(),
        })
    }

    /// aria2 keeps a finished torrent `active` while it seeds.
    fn is_finished(&self) -> bool {
        if self.is_metadata_only() {
            return false;
        }
        let total: u64 = number(&self.total_length);
        let completed: u64 = number(&self.completed_length);
        self.status == "complete"
            || self.seeder == "true"
            || (self.status == "active" && total > 0 && completed == total)
    }

    fn to_sample(&self) -> TransferSample {
        let downloaded: u64 = number(&self.completed_length);
        let total_size: u64 = number(&self.total_length);
        #[allow(clippy::cast_precision_loss)]
        let fraction = if total_size == 0 {
            0.0
        } else {
            (downloaded as f64 / total_size as f64).clamp(0.0, 1.0)
        };
        TransferSample {
            fraction,
            downloaded,
            total_size,
            download_speed: number(&self.download_speed),
            upload_speed: number(&self.upload_speed),
            peers: number(&self.connections),
            seeds: number(&self.num_seeders),
            done: self.is_finished(),
        }
    }
}

/// Minimal aria2 JSON-RPC caller.
#[derive(Debug)]
struct RpcClient {
    http: Client,
    url: String,
    secret: Option<String>,
    next_id: AtomicU64,
}

impl RpcClient {
    fn new(url: &str, secret: Option<String>) -> Result<Self, ClientError> {
        let http = build_http_client("aria2-rpc", |builder| {
            builder
                .timeout(RPC_TIMEOUT)
                .user_agent(default_rpc_user_agent())
        })
        .map_err(|e| ClientError::unavailable(url, e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
            secret,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ClientError> {
        let mut all_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all_params.push(Value::String(format!("token:{secret}")));
        }
        all_params.extend(params);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": all_params,
        });

        // aria2 reports RPC faults with a 4xx status and a JSON body, so the
        // body is parsed regardless of status.
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::unavailable(&self.url, e.to_string()))?;
        let reply: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ClientError::protocol(method, e.to_string()))?;

        if let Some(fault) = reply.error {
            return Err(ClientError::Rejected {
                method: method.to_string(),
                code: fault.code,
                message: fault.message,
            });
        }
        reply
            .result
            .ok_or_else(|| ClientError::protocol(method, "response has neither result nor error"))
    }

    async fn add_uri(&self, locator: &str, dir: &str) -> Result<String, ClientError> {
        let options = json!({ "dir": dir, "seed-time": "0" });
        self.call("aria2.addUri", vec![json!([locator]), options])
            .await
    }

    /// Finds a download aria2 still holds for `hash`, e.g. one paused by an earlier run.
    async fn find_by_info_hash(&self, hash: &str) -> Result<Option<String>, ClientError> {
        let keys = json!(["gid", "infoHash"]);
        let active: Vec<EntryReply> = self.call("aria2.tellActive", vec![keys.clone()]).await?;
        let waiting: Vec<EntryReply> = self
            .call(
                "aria2.tellWaiting",
                vec![json!(0), json!(WAITING_LOOKUP_LIMIT), keys],
            )
            .await?;
        Ok(active
            .into_iter()
            .chain(waiting)
            .find(|entry| entry.info_hash.eq_ignore_ascii_case(hash))
            .map(|entry| entry.gid))
    }

    async fn tell_status(&self, gid: &str) -> Result<StatusReply, ClientError> {
        self.call("aria2.tellStatus", vec![json!(gid), json!(STATUS_KEYS)])
            .await
    }

    /// Reads status for `gid`, moving it along `followedBy` as aria2 hands the
    /// payload to a new GID.
    async fn follow_status(&self, gid: &RwLock<String>) -> Result<StatusReply, ClientError> {
        let mut hops = 0;
        loop {
            let current = gid.read().await.clone();
            let reply = self.tell_status(&current).await?;
            match reply.followed_by.first() {
                Some(next) if hops < MAX_FOLLOW_HOPS => {
                    debug!(from = %current, to = %next, "following aria2 gid");
                    *gid.write().await = next.clone();
                    hops += 1;
                }
                _ => return Ok(reply),
            }
        }
    }
}

/// Connects to a running aria2 with `--enable-rpc`.
#[derive(Debug, Clone)]
pub struct Aria2Connector {
    rpc_url: String,
    secret: Option<String>,
    poll_interval: Duration,
}

impl Aria2Connector {
    /// Creates a connector for `rpc_url` with an optional `--rpc-secret`.
    #[must_use]
    pub fn new(rpc_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            secret: secret.filter(|s| !s.is_empty()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the watcher poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl ClientConnector for Aria2Connector {
    #[instrument(skip(self), fields(url = %self.rpc_url))]
    async fn connect(&self) -> Result<Arc<dyn TransferClient>, ClientError> {
        let rpc = RpcClient::new(&self.rpc_url, self.secret.clone())?;
        let version: VersionReply = rpc
            .call("aria2.getVersion", Vec::new())
            .await
            .map_err(|e| match e {
                ClientError::Unavailable { .. } => e,
                other => ClientError::unavailable(&self.rpc_url, other.to_string()),
            })?;
        info!(version = %version.version, "connected to aria2");
        Ok(Arc::new(Aria2Client {
            rpc: Arc::new(rpc),
            poll_interval: self.poll_interval,
        }))
    }
}

/// [`TransferClient`] backed by aria2.
#[derive(Debug)]
pub struct Aria2Client {
    rpc: Arc<RpcClient>,
    poll_interval: Duration,
}

#[async_trait]
impl TransferClient for Aria2Client {
    #[instrument(skip(self, locator))]
    async fn add(&self, locator: &str, download_dir: &Path) -> Result<AddedTransfer, ClientError> {
        let dir = download_dir.display().to_string();
        let existing = match info_hash(locator) {
            Some(hash) => self.rpc.find_by_info_hash(&hash).await.unwrap_or_else(|error| {
                debug!(error = %error, "aria2 download lookup failed");
                None
            }),
            None => None,
        };
        let gid = match existing {
            Some(gid) => {
                info!(gid = %gid, "re-attaching to download aria2 already holds");
                gid
            }
            None => {
                let gid = self.rpc.add_uri(locator, &dir).await?;
                debug!(gid = %gid, "aria2 accepted locator");
                gid
            }
        };

        let gid = Arc::new(RwLock::new(gid));
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(watch(
            Arc::clone(&self.rpc),
            Arc::clone(&gid),
            tx,
            self.poll_interval,
        ));

        Ok(AddedTransfer {
            handle: Arc::new(Aria2Handle {
                rpc: Arc::clone(&self.rpc),
                gid,
                locator: locator.to_string(),
                dir,
            }),
            events: rx,
        })
    }
}

/// Polls one transfer and turns aria2 status changes into events.
///
/// Ends when the payload completes, the download is removed, or the event
/// receiver goes away.
async fn watch(
    rpc: Arc<RpcClient>,
    gid: Arc<RwLock<String>>,
    events: mpsc::Sender<ClientEvent>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut metadata_sent = false;
    let mut error_reported = false;

    loop {
        ticker.tick().await;
        if events.is_closed() {
            break;
        }

        let reply = match rpc.follow_status(&gid).await {
            Ok(reply) => reply,
            Err(error) => {
                debug!(error = %error, "aria2 status poll failed");
                continue;
            }
        };

        let total_size: u64 = number(&reply.total_length);
        if !metadata_sent && total_size > 0 && !reply.is_metadata_only() {
            metadata_sent = true;
            let event = ClientEvent::Metadata {
                name: reply.torrent_name().map(str::to_string),
                total_size,
                save_path: reply.save_path(),
            };
            if events.send(event).await.is_err() {
                break;
            }
        }

        let event = match reply.status.as_str() {
            _ if reply.is_finished() => Some(ClientEvent::Done {
                save_path: reply.save_path(),
            }),
            "error" if !error_reported => {
                error_reported = true;
                Some(ClientEvent::Error {
                    message: reply
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "aria2 reported an error".to_string()),
                })
            }
            "removed" => break,
            "error" => None,
            _ => {
                error_reported = false;
                None
            }
        };

        if let Some(event) = event {
            let finished = matches!(event, ClientEvent::Done { .. });
            if events.send(event).await.is_err() || finished {
                break;
            }
        }
    }
    debug!("aria2 watcher stopped");
}

#[derive(Debug)]
struct Aria2Handle {
    rpc: Arc<RpcClient>,
    gid: Arc<RwLock<String>>,
    locator: String,
    dir: String,
}

impl Aria2Handle {
    async fn simple_call(&self, method: &str) -> Result<(), ClientError> {
        let gid = self.gid.read().await.clone();
        let _: String = self.rpc.call(method, vec![json!(gid)]).await?;
        Ok(())
    }
}

#[async_trait]
impl TransferHandle for Aria2Handle {
    async fn sample(&self) -> Result<TransferSample, ClientError> {
        Ok(self.rpc.follow_status(&self.gid).await?.to_sample())
    }

    async fn pause(&self) -> Result<(), ClientError> {
        self.simple_call("aria2.pause").await
    }

    /// aria2 cannot unpause a failed download, so that one is added again.
    async fn resume(&self) -> Result<(), ClientError> {
        let status = self.rpc.follow_status(&self.gid).await?;
        if status.status != "error" {
            return self.simple_call("aria2.unpause").await;
        }

        let failed = self.gid.read().await.clone();
        if let Err(error) = self
            .rpc
            .call::<String>("aria2.removeDownloadResult", vec![json!(failed)])
            .await
        {
            debug!(gid = %failed, error = %error, "could not clear failed aria2 result");
        }
        let gid = self.rpc.add_uri(&self.locator, &self.dir).await?;
        info!(from = %failed, to = %gid, "re-added failed aria2 download");
        *self.gid.write().await = gid;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let result = self.simple_call("aria2.forceRemove").await;
        if let Err(error) = &result {
            warn!(error = %error, "aria2 forceRemove failed");
        }
        result
    }
}
