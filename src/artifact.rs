use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};

pub async fn ensure_downloads_root(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create downloads root at {}", path.display()))
}

/// Filesystem-safe rendition of a video title: word characters, spaces and
/// hyphens survive, runs of separators collapse to a single hyphen.
/// `"My Song!"` becomes `"My-Song"`.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut out = String::with_capacity(kept.len());
    let mut pending_break = false;
    for c in kept.trim().chars() {
        if c.is_whitespace() || c == '-' {
            pending_break = true;
        } else {
            if pending_break && !out.is_empty() {
                out.push('-');
            }
            pending_break = false;
            out.push(c);
        }
    }
    out
}

/// Locate the file the extraction engine produced for `title`.
///
/// The engine names its output after the video title with its own
/// sanitization rules, into a directory shared by all jobs, so the exact
/// name cannot be relied on. Fallback chain, first match wins:
/// exact sanitized name, freshest `.mp3` by creation time, then any
/// `.mp3` containing a title token. Every returned path existed on disk
/// at the moment of resolution.
pub async fn resolve_artifact(downloads_dir: &Path, title: &str) -> ConvertResult<PathBuf> {
    let sanitized = sanitize_title(title);

    if !sanitized.is_empty() {
        let expected = downloads_dir.join(format!("{sanitized}.mp3"));
        if fs::try_exists(&expected).await? {
            return Ok(expected);
        }
    }

    let candidates = mp3_files(downloads_dir).await?;

    if let Some(path) = freshest_mp3(&candidates).await {
        debug!(path = %path.display(), "Resolved artifact via freshest-file heuristic");
        return Ok(path);
    }

    if let Some(path) = fuzzy_title_match(&candidates, &sanitized) {
        debug!(path = %path.display(), "Resolved artifact via title-token match");
        return Ok(path);
    }

    Err(ConvertError::Resolution(downloads_dir.to_path_buf()))
}

async fn mp3_files(downloads_dir: &Path) -> ConvertResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(downloads_dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_mp3 = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
        if is_mp3 {
            files.push(path);
        }
    }
    Ok(files)
}

/// Most recently created candidate. Creation time is unavailable on some
/// filesystems; files without it are skipped, and the caller falls through
/// to the token match when none carry one.
async fn freshest_mp3(candidates: &[PathBuf]) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, &PathBuf)> = None;
    for path in candidates {
        let Ok(meta) = fs::metadata(path).await else {
            continue;
        };
        let Ok(created) = meta.created() else {
            continue;
        };
        if best.as_ref().is_none_or(|(t, _)| created > *t) {
            best = Some((created, path));
        }
    }
    best.map(|(_, path)| path.clone())
}

/// Any candidate whose name contains a sanitized-title token longer than
/// three characters, case-insensitively.
fn fuzzy_title_match(candidates: &[PathBuf], sanitized: &str) -> Option<PathBuf> {
    let tokens: Vec<String> = sanitized
        .split('-')
        .filter(|word| word.chars().count() > 3)
        .map(|word| word.to_lowercase())
        .collect();
    if tokens.is_empty() {
        return None;
    }

    candidates
        .iter()
        .find(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            tokens.iter().any(|token| name.contains(token))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sanitize_strips_punctuation_and_joins_with_hyphens() {
        assert_eq!(sanitize_title("My Song!"), "My-Song");
        assert_eq!(sanitize_title("  a   b  "), "a-b");
        assert_eq!(sanitize_title("Tiret - déjà là"), "Tiret-déjà-là");
        assert_eq!(sanitize_title("!!!"), "");
    }

    #[tokio::test]
    async fn exact_sanitized_name_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("Decoy.mp3"), b"x")
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Newer file on disk, but the exact name must still win.
        tokio::fs::write(dir.path().join("My-Song.mp3"), b"x")
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::fs::write(dir.path().join("Newest.mp3"), b"x")
            .await
            .expect("write");

        let resolved = resolve_artifact(dir.path(), "My Song!")
            .await
            .expect("resolve");
        assert_eq!(resolved, dir.path().join("My-Song.mp3"));
    }

    #[tokio::test]
    async fn falls_back_to_freshest_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("First.mp3"), b"x")
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::fs::write(dir.path().join("Second.mp3"), b"x")
            .await
            .expect("write");

        let resolved = resolve_artifact(dir.path(), "No Such Title")
            .await
            .expect("resolve");
        assert_eq!(resolved, dir.path().join("Second.mp3"));
    }

    #[tokio::test]
    async fn empty_directory_fails_resolution() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("notes.txt"), b"x")
            .await
            .expect("write");

        let err = resolve_artifact(dir.path(), "My Song").await.unwrap_err();
        assert!(matches!(err, ConvertError::Resolution(_)));
    }

    #[test]
    fn fuzzy_match_needs_a_long_token() {
        let candidates = vec![PathBuf::from("Artist - My Song (Official).mp3")];
        assert_eq!(
            fuzzy_title_match(&candidates, "My-Song"),
            Some(PathBuf::from("Artist - My Song (Official).mp3"))
        );
        // "My" and "cat" are too short to count as evidence.
        assert_eq!(fuzzy_title_match(&candidates, "My-cat"), None);
        assert_eq!(fuzzy_title_match(&candidates, ""), None);
    }
}
