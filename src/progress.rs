use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::{models::JobState, registry::JobRegistry};

/// Progress event emitted by the extraction collaborator while a download
/// runs. Decouples the subprocess read loop from registry writes: events
/// flow over a channel and a single reporter task owns the write-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Downloading {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        total_bytes_estimate: Option<u64>,
    },
    /// The media transfer is done but the transcode step is still pending.
    Finished,
}

/// Percent shown to pollers for a `Downloading` event. Prefers the exact
/// total, falls back to the estimate, and reports 0 when neither gives a
/// basis for estimation. Rounded to one decimal.
pub fn download_percent(
    downloaded_bytes: u64,
    total_bytes: Option<u64>,
    total_bytes_estimate: Option<u64>,
) -> f64 {
    let basis = total_bytes.or(total_bytes_estimate).filter(|&t| t > 0);
    match basis {
        Some(total) => {
            let percent = downloaded_bytes as f64 / total as f64 * 100.0;
            ((percent * 10.0).round() / 10.0).min(100.0)
        }
        None => 0.0,
    }
}

/// Translate collaborator events into registry updates for one job.
/// Writes through on every event so pollers see near-real-time progress;
/// the task ends when the collaborator drops its sender.
pub fn spawn_progress_reporter(
    registry: JobRegistry,
    job_id: String,
    mut events_rx: mpsc::UnboundedReceiver<DownloadEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                DownloadEvent::Downloading {
                    downloaded_bytes,
                    total_bytes,
                    total_bytes_estimate,
                } => {
                    let percent =
                        download_percent(downloaded_bytes, total_bytes, total_bytes_estimate);
                    registry
                        .transition(
                            &job_id,
                            JobState::Downloading,
                            percent,
                            format!("Téléchargement... {percent}%"),
                        )
                        .await;
                }
                DownloadEvent::Finished => {
                    registry
                        .transition(
                            &job_id,
                            JobState::Processing,
                            90.0,
                            "Conversion en cours...",
                        )
                        .await;
                }
            }
        }
        debug!(job_id, "Progress event stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobRecord;

    #[test]
    fn percent_uses_exact_total_first() {
        assert_eq!(download_percent(50, Some(200), None), 25.0);
        assert_eq!(download_percent(50, Some(200), Some(100)), 25.0);
    }

    #[test]
    fn percent_falls_back_to_estimate() {
        assert_eq!(download_percent(50, None, Some(100)), 50.0);
    }

    #[test]
    fn percent_without_any_total_is_zero() {
        assert_eq!(download_percent(50, None, None), 0.0);
        assert_eq!(download_percent(50, Some(0), Some(0)), 0.0);
    }

    #[test]
    fn percent_is_rounded_and_capped() {
        assert_eq!(download_percent(1, Some(3), None), 33.3);
        assert_eq!(download_percent(300, Some(200), None), 100.0);
    }

    #[tokio::test]
    async fn finished_event_always_lands_on_processing_at_ninety() {
        let registry = JobRegistry::new();
        registry
            .insert(JobRecord::new("conv_1", "Initialisation..."))
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = spawn_progress_reporter(registry.clone(), "conv_1".to_string(), rx);

        tx.send(DownloadEvent::Downloading {
            downloaded_bytes: 50,
            total_bytes: Some(200),
            total_bytes_estimate: None,
        })
        .expect("send");
        tx.send(DownloadEvent::Finished).expect("send");
        drop(tx);
        reporter.await.expect("reporter task");

        let job = registry.get("conv_1").await.expect("job");
        assert_eq!(job.status, JobState::Processing);
        assert_eq!(job.percent, 90.0);
        assert_eq!(job.message, "Conversion en cours...");
    }

    #[tokio::test]
    async fn downloading_events_write_through_with_percent() {
        let registry = JobRegistry::new();
        registry
            .insert(JobRecord::new("conv_1", "Initialisation..."))
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = spawn_progress_reporter(registry.clone(), "conv_1".to_string(), rx);

        tx.send(DownloadEvent::Downloading {
            downloaded_bytes: 25,
            total_bytes: None,
            total_bytes_estimate: Some(100),
        })
        .expect("send");
        drop(tx);
        reporter.await.expect("reporter task");

        let job = registry.get("conv_1").await.expect("job");
        assert_eq!(job.status, JobState::Downloading);
        assert_eq!(job.percent, 25.0);
        assert_eq!(job.message, "Téléchargement... 25%");
    }
}
