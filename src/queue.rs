use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    artifact::resolve_artifact,
    error::ConvertResult,
    models::JobState,
    progress::spawn_progress_reporter,
    ytdlp::MediaExtractor,
    AppState,
};

/// One queued unit of work. The registry record is created at dispatch
/// time; the queue only carries what the worker needs to run it.
#[derive(Debug)]
pub struct ConvertTask {
    pub job_id: String,
    pub url: String,
}

/// Job identifier: time component plus a random component, so concurrent
/// submissions of the same URL still get distinct ids.
pub fn new_job_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}_{}", Utc::now().timestamp(), &suffix[..8])
}

/// Fixed pool of conversion workers draining the bounded queue. Admission
/// control happens at the sending side; workers just run whatever was
/// accepted, one job at a time each.
pub fn spawn_convert_workers(state: AppState, queue_rx: mpsc::Receiver<ConvertTask>) {
    let queue_rx = Arc::new(Mutex::new(queue_rx));
    for worker in 0..state.config.worker_count {
        let state = state.clone();
        let queue_rx = Arc::clone(&queue_rx);
        tokio::spawn(async move {
            loop {
                let task = { queue_rx.lock().await.recv().await };
                let Some(task) = task else {
                    break;
                };
                info!(worker, job_id = %task.job_id, "Worker picked conversion job");
                run_conversion(&state, &task.job_id, &task.url).await;
            }
        });
    }
}

/// Drive one job to its terminal state. Every failure is converted into
/// terminal job state here; nothing propagates to the caller. The resolved
/// artifact path is returned so the synchronous API surface can hand the
/// result back directly.
pub async fn run_conversion(state: &AppState, job_id: &str, url: &str) -> Option<PathBuf> {
    match convert(state, job_id, url).await {
        Ok(path) => Some(path),
        Err(err) => {
            error!(job_id = %job_id, "Conversion failed: {err}");
            state
                .registry
                .transition(job_id, JobState::Error, 0.0, format!("Erreur: {err}"))
                .await;
            None
        }
    }
}

async fn convert(state: &AppState, job_id: &str, url: &str) -> ConvertResult<PathBuf> {
    // First registry write before any external call, so pollers see the
    // job leave the queue the moment work begins.
    state
        .registry
        .transition(job_id, JobState::Pending, 0.0, "Initialisation...")
        .await;

    let extractor = MediaExtractor::new(&state.config);

    // The title only seeds the expected artifact name; a failed lookup is
    // not fatal, the resolver falls back to its heuristics.
    let title = match extractor.fetch_metadata(url).await {
        Ok(meta) => meta.title,
        Err(err) => {
            warn!(job_id = %job_id, "Metadata lookup failed, using generic title: {err}");
            "unknown".to_string()
        }
    };

    info!(job_id = %job_id, title = %title, url = %url, "Conversion job started");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let reporter = spawn_progress_reporter(state.registry.clone(), job_id.to_string(), events_rx);

    let download_result = extractor
        .download_audio(url, &state.config.downloads_dir, events_tx)
        .await;

    // The collaborator dropped its sender by now; let the reporter flush
    // the remaining events before the terminal write.
    if let Err(err) = reporter.await {
        warn!(job_id = %job_id, "Progress reporter join error: {err}");
    }
    download_result?;

    let path = resolve_artifact(&state.config.downloads_dir, &title).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{job_id}.mp3"));

    state
        .registry
        .complete(job_id, path.clone(), file_name.clone())
        .await;

    info!(job_id = %job_id, artifact = %file_name, "Conversion job completed");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, models::JobRecord, registry::JobRegistry};
    use std::net::SocketAddr;

    #[test]
    fn job_ids_are_distinct_for_the_same_url() {
        let first = new_job_id("conv");
        let second = new_job_id("conv");
        assert!(first.starts_with("conv_"));
        assert!(second.starts_with("conv_"));
        assert_ne!(first, second);
    }

    fn test_state(downloads_dir: PathBuf) -> AppState {
        let (queue_tx, _queue_rx) = mpsc::channel(1);
        AppState {
            config: Config {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                downloads_dir,
                ytdlp_bin: "yt-dlp-test-binary-that-does-not-exist".to_string(),
                ffmpeg_location: None,
                queue_capacity: 1,
                worker_count: 1,
            },
            registry: JobRegistry::new(),
            queue_tx,
        }
    }

    #[tokio::test]
    async fn failures_end_in_terminal_error_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path().to_path_buf());
        state
            .registry
            .insert(JobRecord::new("conv_1", "En attente..."))
            .await;

        let result = run_conversion(&state, "conv_1", "https://youtu.be/abc123").await;
        assert!(result.is_none());

        let job = state.registry.get("conv_1").await.expect("job");
        assert_eq!(job.status, JobState::Error);
        assert_eq!(job.percent, 0.0);
        assert!(job.message.starts_with("Erreur: "));
    }
}
