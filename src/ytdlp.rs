use std::{collections::VecDeque, path::Path, process::Stdio};

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::debug;
use url::Url;

use crate::{
    config::Config,
    error::{ConvertError, ConvertResult},
    models::VideoMetadata,
    progress::DownloadEvent,
};

/// Machine-readable progress lines: `dl:<status>|<downloaded>|<total>|<estimate>`,
/// with absent fields rendered as `NA` by yt-dlp.
const PROGRESS_TEMPLATE: &str = "download:dl:%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s";

const PROGRESS_PREFIX: &str = "dl:";

/// How many trailing stderr lines to keep for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Boundary to the external extraction engine (yt-dlp plus its ffmpeg
/// postprocessor). Opaque and best-effort: it reports progress as it goes
/// and names the produced file after the video title, with no guarantee
/// the name matches what we expect (see the artifact resolver).
#[derive(Debug, Clone)]
pub struct MediaExtractor {
    ytdlp_bin: String,
    ffmpeg_location: Option<std::path::PathBuf>,
}

impl MediaExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp_bin: config.ytdlp_bin.clone(),
            ffmpeg_location: config.ffmpeg_location.clone(),
        }
    }

    fn ensure_available(&self) -> ConvertResult<()> {
        which::which(&self.ytdlp_bin).map_err(|_| ConvertError::YtDlpNotFound)?;
        Ok(())
    }

    /// Look up video metadata without downloading anything.
    pub async fn fetch_metadata(&self, url: &str) -> ConvertResult<VideoMetadata> {
        self.ensure_available()?;

        let output = Command::new(&self.ytdlp_bin)
            .args(["--dump-json", "--no-playlist", "--no-warnings", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvertError::extraction(
                stderr.lines().last().unwrap_or("unknown yt-dlp error"),
            ));
        }

        let info: Value = serde_json::from_slice(&output.stdout)?;
        Ok(metadata_from_info(&info))
    }

    /// Download the source audio and transcode it to MP3 in `downloads_dir`.
    ///
    /// Progress is forwarded as `DownloadEvent`s on `events_tx` while the
    /// subprocess runs; the final `Finished` event arrives before the
    /// transcode step completes, so callers must still wait for this
    /// function to return before looking for the artifact.
    pub async fn download_audio(
        &self,
        url: &str,
        downloads_dir: &Path,
        events_tx: mpsc::UnboundedSender<DownloadEvent>,
    ) -> ConvertResult<()> {
        self.ensure_available()?;

        let output_template = downloads_dir.join("%(title)s.%(ext)s");

        let mut cmd = Command::new(&self.ytdlp_bin);
        cmd.args(["--newline", "--no-playlist", "--no-warnings", "--progress"])
            .args(["--format", "bestaudio/best"])
            .args(["--extract-audio", "--audio-format", "mp3"])
            .args(["--audio-quality", "192K"])
            .args(["--progress-template", PROGRESS_TEMPLATE])
            .arg("--output")
            .arg(&output_template);

        if let Some(ffmpeg) = &self.ffmpeg_location {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }

        let mut child = cmd
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(stdout) = child.stdout.take() else {
            return Err(ConvertError::download("yt-dlp stdout was not captured"));
        };

        // Keep the stderr tail for the error message if the process fails.
        let stderr_task = child.stderr.take().map(|stream| {
            tokio::spawn(async move {
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stream).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "yt-dlp stderr");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(event) = parse_progress_line(&line) {
                // A closed receiver just means nobody is watching anymore;
                // keep draining so the subprocess can run to completion.
                let _ = events_tx.send(event);
            }
        }

        let status = child.wait().await?;

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => VecDeque::new(),
        };

        if !status.success() {
            let reason = stderr_tail
                .back()
                .cloned()
                .unwrap_or_else(|| format!("yt-dlp exited with {status}"));
            return Err(ConvertError::download(reason));
        }

        Ok(())
    }
}

fn metadata_from_info(info: &Value) -> VideoMetadata {
    VideoMetadata {
        title: info["title"]
            .as_str()
            .unwrap_or("Titre non disponible")
            .to_string(),
        duration: info["duration"].as_f64().unwrap_or(0.0) as u64,
        uploader: info["uploader"].as_str().unwrap_or("Inconnu").to_string(),
        view_count: info["view_count"].as_u64().unwrap_or(0),
        thumbnail: info["thumbnail"].as_str().unwrap_or_default().to_string(),
        id: info["id"].as_str().unwrap_or_default().to_string(),
    }
}

/// Parse one stdout line of the download subprocess into an event.
/// Non-progress lines (format listings, postprocessor chatter) yield None.
pub fn parse_progress_line(line: &str) -> Option<DownloadEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split('|');

    match fields.next()? {
        "finished" => Some(DownloadEvent::Finished),
        "downloading" => Some(DownloadEvent::Downloading {
            downloaded_bytes: parse_byte_field(fields.next()?).unwrap_or(0),
            total_bytes: parse_byte_field(fields.next()?),
            total_bytes_estimate: parse_byte_field(fields.next()?),
        }),
        _ => None,
    }
}

// yt-dlp renders byte counts as integers or floats, and "NA" when unknown.
fn parse_byte_field(field: &str) -> Option<u64> {
    field.trim().parse::<f64>().ok().map(|v| v as u64)
}

/// Whether the submitted URL points at the supported platform. Accepts the
/// usual watch/short-link/embed shapes, with or without an explicit scheme.
pub fn is_supported_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let Ok(url) = Url::parse(&candidate) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };

    match host.to_ascii_lowercase().as_str() {
        "youtube.com" | "www.youtube.com" | "m.youtube.com" => {
            let path = url.path();
            if path == "/watch" {
                url.query_pairs().any(|(key, value)| key == "v" && !value.is_empty())
            } else {
                has_segment_after(path, "/embed/") || has_segment_after(path, "/v/")
            }
        }
        "youtu.be" => url.path().len() > 1,
        _ => false,
    }
}

fn has_segment_after(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_the_usual_url_shapes() {
        assert!(is_supported_url("https://www.youtube.com/watch?v=abc123"));
        assert!(is_supported_url("https://youtu.be/abc123"));
        assert!(is_supported_url("https://www.youtube.com/embed/abc123"));
        assert!(is_supported_url("https://www.youtube.com/v/abc123"));
        assert!(is_supported_url("https://m.youtube.com/watch?v=abc123"));
        assert!(is_supported_url("youtube.com/watch?v=abc123"));
    }

    #[test]
    fn rejects_other_hosts_and_empty_ids() {
        assert!(!is_supported_url("https://example.com/watch?v=abc123"));
        assert!(!is_supported_url("https://vimeo.com/12345"));
        assert!(!is_supported_url("https://www.youtube.com/watch"));
        assert!(!is_supported_url("https://www.youtube.com/embed/"));
        assert!(!is_supported_url("https://youtu.be/"));
        assert!(!is_supported_url(""));
    }

    #[test]
    fn parses_downloading_progress_lines() {
        assert_eq!(
            parse_progress_line("dl:downloading|50|200|NA"),
            Some(DownloadEvent::Downloading {
                downloaded_bytes: 50,
                total_bytes: Some(200),
                total_bytes_estimate: None,
            })
        );
        // Estimates come through as floats.
        assert_eq!(
            parse_progress_line("dl:downloading|1024|NA|2048.5"),
            Some(DownloadEvent::Downloading {
                downloaded_bytes: 1024,
                total_bytes: None,
                total_bytes_estimate: Some(2048),
            })
        );
    }

    #[test]
    fn parses_the_finished_marker() {
        assert_eq!(
            parse_progress_line("dl:finished|1048576|1048576|NA"),
            Some(DownloadEvent::Finished)
        );
    }

    #[test]
    fn ignores_non_progress_output() {
        assert_eq!(parse_progress_line("[ExtractAudio] Destination: x.mp3"), None);
        assert_eq!(parse_progress_line(""), None);
        assert_eq!(parse_progress_line("dl:unknown|1|2|3"), None);
    }

    #[test]
    fn metadata_falls_back_to_defaults() {
        let info = json!({"duration": 12.7});
        let meta = metadata_from_info(&info);
        assert_eq!(meta.title, "Titre non disponible");
        assert_eq!(meta.uploader, "Inconnu");
        assert_eq!(meta.duration, 12);
        assert_eq!(meta.view_count, 0);
        assert_eq!(meta.thumbnail, "");
    }

    #[test]
    fn metadata_reads_populated_fields() {
        let info = json!({
            "title": "My Song!",
            "duration": 215,
            "uploader": "Some Channel",
            "view_count": 42000,
            "thumbnail": "https://i.ytimg.com/vi/abc/hq.jpg",
            "id": "abc123"
        });
        let meta = metadata_from_info(&info);
        assert_eq!(meta.title, "My Song!");
        assert_eq!(meta.duration, 215);
        assert_eq!(meta.view_count, 42000);
        assert_eq!(meta.id, "abc123");
    }
}
