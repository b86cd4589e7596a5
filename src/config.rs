use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub downloads_dir: PathBuf,
    pub ytdlp_bin: String,
    /// Explicit ffmpeg location handed to yt-dlp, when the binary is not
    /// on PATH (shared-hosting deployments ship their own under bin/).
    pub ffmpeg_location: Option<PathBuf>,
    pub queue_capacity: usize,
    pub worker_count: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("TUBE_AUDIO_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
        let bind_addr = bind_raw
            .trim()
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 5000)));

        let downloads_dir = PathBuf::from(
            env::var("TUBE_AUDIO_DOWNLOADS_DIR").unwrap_or_else(|_| "./downloads".to_string()),
        );

        let ytdlp_bin =
            env::var("TUBE_AUDIO_YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string());

        let queue_capacity = env::var("TUBE_AUDIO_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(64);

        let worker_count = env::var("TUBE_AUDIO_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(4);

        Ok(Self {
            bind_addr,
            downloads_dir,
            ytdlp_bin,
            ffmpeg_location: resolve_ffmpeg_location(),
            queue_capacity,
            worker_count,
        })
    }
}

/// Priority: FFMPEG_PATH env var, then a local bin/ffmpeg, else rely on
/// whatever yt-dlp finds on PATH.
fn resolve_ffmpeg_location() -> Option<PathBuf> {
    if let Ok(value) = env::var("FFMPEG_PATH") {
        let path = PathBuf::from(value.trim());
        if path.is_file() {
            return Some(path);
        }
    }

    let local = env::current_dir().ok()?.join("bin").join("ffmpeg");
    if local.is_file() {
        return Some(local);
    }

    None
}
