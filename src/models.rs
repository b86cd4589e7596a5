use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a conversion job.
///
/// `NotFound` is synthetic: it is only ever synthesized when a poller asks
/// for an unknown id, never stored in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Downloading,
    Processing,
    Completed,
    Error,
    NotFound,
}

impl JobState {
    /// Ordering used to reject backward transitions. `Completed` and
    /// `Error` share the terminal rank; a job reaches exactly one of them.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Processing => 2,
            Self::Completed | Self::Error => 3,
            Self::NotFound => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobState,
    pub percent: f64,
    pub message: String,
    pub file_path: Option<PathBuf>,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobState::Pending,
            percent: 0.0,
            message: message.into(),
            file_path: None,
            file_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_response(&self) -> ProgressResponse {
        ProgressResponse {
            status: self.status,
            percent: self.percent,
            message: self.message.clone(),
            file_path: self
                .file_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            filename: self.file_name.clone(),
        }
    }
}

/// Wire shape of `GET /progress/{id}`. The artifact fields appear only
/// once the job is completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub status: JobState,
    pub percent: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ProgressResponse {
    pub fn not_found() -> Self {
        Self {
            status: JobState::NotFound,
            percent: 0.0,
            message: "Conversion non trouvée".to_string(),
            file_path: None,
            filename: None,
        }
    }
}

/// Metadata returned by the extraction collaborator. Ephemeral; handed
/// straight back to validation/info callers, never stored in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub duration: u64,
    pub uploader: String,
    pub view_count: u64,
    pub thumbnail: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub info: VideoMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertAcceptedResponse {
    pub progress_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiConvertResponse {
    pub success: bool,
    pub title: String,
    pub progress_id: String,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiInfoResponse {
    pub success: bool,
    pub info: VideoMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_response_hides_artifact_until_completed() {
        let record = JobRecord::new("conv_1", "Initialisation...");
        let body = serde_json::to_value(record.to_response()).expect("serialize");
        assert_eq!(body["status"], "pending");
        assert!(body.get("file_path").is_none());
        assert!(body.get("filename").is_none());
    }

    #[test]
    fn not_found_is_synthesized_with_zero_percent() {
        let body = serde_json::to_value(ProgressResponse::not_found()).expect("serialize");
        assert_eq!(body["status"], "not_found");
        assert_eq!(body["percent"], 0.0);
    }

    #[test]
    fn terminal_states_share_top_rank() {
        assert!(JobState::Pending.rank() < JobState::Downloading.rank());
        assert!(JobState::Downloading.rank() < JobState::Processing.rank());
        assert_eq!(JobState::Completed.rank(), JobState::Error.rank());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }
}
