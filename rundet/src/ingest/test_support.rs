//! Canned ingestion collaborators for unit tests.

use super::{IngestError, Ingestor};
use rundet_common::instrument::run_filename;
use rundet_common::JobRequest;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// A representative job request rooted in an archive-shaped path.
pub fn sample_job_request(instrument: &str, run_number: u32) -> JobRequest {
    let filepath = PathBuf::from(format!(
        "/archive/NDX{}/Instrument/data/cycle_24_2/{}",
        instrument.to_uppercase(),
        run_filename(instrument, run_number)
    ));
    JobRequest {
        run_number,
        instrument: instrument.to_string(),
        experiment_title: "Test experiment".to_string(),
        experiment_number: "1820497".to_string(),
        filepath,
        run_start: "2024-07-01T10:00:00".to_string(),
        run_end: "2024-07-01T11:00:00".to_string(),
        raw_frames: 8067,
        good_frames: 6452,
        users: "Keiran Nash".to_string(),
        additional_values: BTreeMap::new(),
        will_reduce: true,
        additional_requests: Vec::new(),
    }
}

/// An [`Ingestor`] backed by in-memory tables, keyed by exact path.
#[derive(Default)]
pub struct StubIngestor {
    pub titles: HashMap<PathBuf, String>,
    pub requests: HashMap<PathBuf, JobRequest>,
}

impl StubIngestor {
    pub fn with_title(mut self, path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        self.titles.insert(path.into(), title.into());
        self
    }

    pub fn with_request(mut self, job_request: JobRequest) -> Self {
        self.requests
            .insert(job_request.filepath.clone(), job_request);
        self
    }
}

impl Ingestor for StubIngestor {
    fn ingest(&self, path: &Path) -> Result<JobRequest, IngestError> {
        self.requests
            .get(path)
            .cloned()
            .ok_or_else(|| IngestError::FileNotFound(path.to_path_buf()))
    }

    fn run_title(&self, path: &Path) -> Result<String, IngestError> {
        self.titles
            .get(path)
            .cloned()
            .ok_or_else(|| IngestError::FileNotFound(path.to_path_buf()))
    }
}
