//! Ingestion boundary
//!
//! Converts a data file into a [`JobRequest`]. The binary decoding of the
//! file lives behind two seams: [`Ingestor`] is what the orchestration loop
//! and the stitch rules call, and [`NexusData`] is the record-access trait
//! the metadata construction is written against, so every piece of
//! extraction logic is exercised without a real HDF5 library. The
//! HDF5-backed adapter is compiled in with the `nexus` feature.

pub mod extracts;
#[cfg(feature = "nexus")]
pub mod nexus;
#[cfg(test)]
pub mod test_support;

use rundet_common::JobRequest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Ingestion failures; unrecoverable for the message that carried the path.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The file named by the message does not exist
    #[error("Data file not found: {0}")]
    FileNotFound(PathBuf),

    /// Wrong extension; only `.nxs` files are evaluated
    #[error("File is not a nexus file: {0}")]
    NotNexusFile(PathBuf),

    /// Structurally unreadable or missing required metadata
    #[error("Malformed data file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// Metadata present but semantically inconsistent; the run can never be
    /// reduced, so the message is acknowledged without retry
    #[error("Reduction metadata error: {0}")]
    ReductionMetadata(String),
}

/// Read access into one run's raw data record.
///
/// Keys are slash-separated paths mirroring the file layout, e.g.
/// `sample/thickness` or `selog/freq10/value_log/value`. A `None` means the
/// entry is absent or not of the requested shape.
pub trait NexusData {
    fn string(&self, key: &str) -> Option<String>;
    fn int(&self, key: &str) -> Option<i64>;
    fn float(&self, key: &str) -> Option<f64>;
    fn float_list(&self, key: &str) -> Option<Vec<f64>>;
}

/// The boundary the rest of the service talks to.
pub trait Ingestor: Send + Sync {
    /// Build a full job request from a data file.
    fn ingest(&self, path: &Path) -> Result<JobRequest, IngestError>;

    /// Title-only read, used by the stitch walk to compare neighbouring runs
    /// without paying for a full ingest.
    fn run_title(&self, path: &Path) -> Result<String, IngestError>;
}

/// Construct the production ingestor.
#[cfg(feature = "nexus")]
pub fn default_ingestor() -> rundet_common::Result<Box<dyn Ingestor>> {
    Ok(Box::new(nexus::NexusIngestor))
}

/// Construct the production ingestor.
#[cfg(not(feature = "nexus"))]
pub fn default_ingestor() -> rundet_common::Result<Box<dyn Ingestor>> {
    Err(rundet_common::Error::Config(
        "built without nexus support; rebuild with `--features nexus`".to_string(),
    ))
}

fn required_string(data: &dyn NexusData, path: &Path, key: &str) -> Result<String, IngestError> {
    data.string(key).ok_or_else(|| IngestError::Malformed {
        path: path.to_path_buf(),
        reason: format!("missing dataset: {key}"),
    })
}

fn required_int(data: &dyn NexusData, path: &Path, key: &str) -> Result<i64, IngestError> {
    data.int(key).ok_or_else(|| IngestError::Malformed {
        path: path.to_path_buf(),
        reason: format!("missing dataset: {key}"),
    })
}

/// Build a job request from an opened record: the common metadata shared by
/// every instrument, then the instrument-specific extraction pass.
pub fn build_job_request(path: &Path, data: &dyn NexusData) -> Result<JobRequest, IngestError> {
    if path.extension().and_then(|e| e.to_str()) != Some("nxs") {
        return Err(IngestError::NotNexusFile(path.to_path_buf()));
    }

    info!("Extracting common metadata from {}", path.display());
    let run_number = required_int(data, path, "run_number")?;
    let run_number = u32::try_from(run_number).map_err(|_| IngestError::Malformed {
        path: path.to_path_buf(),
        reason: format!("run_number must be positive, got {run_number}"),
    })?;
    if run_number == 0 {
        return Err(IngestError::Malformed {
            path: path.to_path_buf(),
            reason: "run_number must be positive, got 0".to_string(),
        });
    }

    let mut job_request = JobRequest {
        run_number,
        instrument: required_string(data, path, "beamline")?,
        experiment_title: required_string(data, path, "title")?,
        experiment_number: required_string(data, path, "experiment_identifier")?,
        filepath: path.to_path_buf(),
        run_start: required_string(data, path, "start_time")?,
        run_end: required_string(data, path, "end_time")?,
        raw_frames: required_int(data, path, "raw_frames")? as u64,
        good_frames: required_int(data, path, "good_frames")? as u64,
        users: required_string(data, path, "user_1/name")?,
        additional_values: BTreeMap::new(),
        will_reduce: true,
        additional_requests: Vec::new(),
    };

    extracts::enrich(&mut job_request, data)?;
    info!(
        "Created job request for {} run {}",
        job_request.instrument, job_request.run_number
    );
    Ok(job_request)
}
