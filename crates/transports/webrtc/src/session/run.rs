//! Recording runs and their file manifests

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::leg::LegMap;

/// One start/stop cycle of recording within a session.
///
/// The manifest is fixed when the run starts and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRun {
    run_id: String,
    started_at: DateTime<Utc>,
    files: LegMap<PathBuf>,
}

impl RecordingRun {
    /// Mint a run and derive its per-leg output paths
    /// (`{dir}/{leg}-{session}-{run}.{ext}`)
    pub fn begin(recordings_dir: &Path, session_id: &str, extension: &str) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let files = LegMap::from_fn(|leg| {
            recordings_dir.join(format!("{}-{}-{}.{}", leg, session_id, run_id, extension))
        });
        Self {
            run_id,
            started_at: Utc::now(),
            files,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn files(&self) -> &LegMap<PathBuf> {
        &self.files
    }
}
