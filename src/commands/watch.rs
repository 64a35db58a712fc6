//! Progress bar for a single transfer, driven by publisher events.

use std::time::Duration;

use anyhow::Result;
use gamegrab_core::{TransferEngine, TransferEvent};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Bar resolution: one tick per 0.1 %.
const BAR_LENGTH: u64 = 1000;

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchOutcome {
    Completed { save_path: Option<String> },
    Failed { message: String },
    Interrupted,
}

/// Renders events for `id` until it completes, fails, or Ctrl-C is pressed.
///
/// Ctrl-C pauses the transfer before returning.
pub(crate) async fn watch_transfer(
    engine: &TransferEngine,
    mut events: broadcast::Receiver<TransferEvent>,
    id: &str,
    show_bar: bool,
) -> Result<WatchOutcome> {
    let bar = if show_bar {
        let bar = ProgressBar::new(BAR_LENGTH);
        bar.set_style(
            ProgressStyle::with_template("{spinner} {prefix} [{bar:30}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };
    bar.set_prefix(id.to_string());
    bar.set_message("waiting for peers");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let event = tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(error) = signal {
                    warn!(error = %error, "failed to listen for Ctrl-C");
                }
                bar.abandon_with_message("interrupted; pausing");
                if let Err(error) = engine.pause(id).await {
                    warn!(id, error = %error, "failed to pause transfer on interrupt");
                }
                return Ok(WatchOutcome::Interrupted);
            }
            event = events.recv() => event,
        };

        match event {
            Ok(event) if event.id() != id => {}
            Ok(TransferEvent::Progress {
                progress,
                download_speed,
                downloaded,
                total_size,
                peers,
                eta,
                ..
            }) => {
                bar.set_position(progress_position(progress));
                bar.set_message(progress_message(
                    progress,
                    download_speed,
                    downloaded,
                    total_size,
                    peers,
                    eta,
                ));
            }
            Ok(TransferEvent::Completed { save_path, .. }) => {
                bar.set_position(BAR_LENGTH);
                bar.finish_with_message("done");
                return Ok(WatchOutcome::Completed { save_path });
            }
            Ok(TransferEvent::Error { message, .. }) => {
                bar.abandon_with_message("failed");
                return Ok(WatchOutcome::Failed { message });
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress renderer lagged"),
            Err(RecvError::Closed) => {
                bar.abandon();
                return Ok(WatchOutcome::Failed {
                    message: "event channel closed".to_string(),
                });
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn progress_position(progress: f64) -> u64 {
    (progress.clamp(0.0, 100.0) * 10.0).round() as u64
}

fn progress_message(
    progress: f64,
    download_speed: u64,
    downloaded: u64,
    total_size: u64,
    peers: u32,
    eta: Option<u64>,
) -> String {
    let size = if total_size == 0 {
        format!("{}", HumanBytes(downloaded))
    } else {
        format!("{} / {}", HumanBytes(downloaded), HumanBytes(total_size))
    };
    let eta = eta.map_or_else(
        || "eta --".to_string(),
        |secs| format!("eta {}", HumanDuration(Duration::from_secs(secs))),
    );
    format!(
        "{progress:.1}%  {size}  {}/s  {peers} peers  {eta}",
        HumanBytes(download_speed)
    )
}
