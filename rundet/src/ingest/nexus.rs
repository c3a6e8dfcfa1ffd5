//! HDF5-backed [`NexusData`] access. Compiled only with the `nexus` feature
//! since it links against the system HDF5 library.

use super::{build_job_request, IngestError, Ingestor, NexusData};
use hdf5::types::{VarLenAscii, VarLenUnicode};
use rundet_common::JobRequest;
use std::path::Path;

/// The entry group all run metadata hangs off.
const ENTRY_GROUP: &str = "raw_data_1";

pub struct NexusIngestor;

struct NexusEntry {
    entry: hdf5::Group,
}

impl NexusEntry {
    fn open(path: &Path) -> Result<Self, IngestError> {
        if !path.exists() {
            return Err(IngestError::FileNotFound(path.to_path_buf()));
        }
        let file = hdf5::File::open(path).map_err(|e| IngestError::Malformed {
            path: path.to_path_buf(),
            reason: format!("not a readable HDF5 file: {e}"),
        })?;
        let entry = file.group(ENTRY_GROUP).map_err(|e| IngestError::Malformed {
            path: path.to_path_buf(),
            reason: format!("missing {ENTRY_GROUP} group: {e}"),
        })?;
        Ok(Self { entry })
    }
}

impl NexusData for NexusEntry {
    fn string(&self, key: &str) -> Option<String> {
        let dataset = self.entry.dataset(key).ok()?;
        // ISIS files carry both unicode and ascii string datasets, scalar or
        // one-element.
        if let Ok(value) = dataset.read_scalar::<VarLenUnicode>() {
            return Some(value.to_string());
        }
        if let Ok(value) = dataset.read_scalar::<VarLenAscii>() {
            return Some(value.to_string());
        }
        if let Ok(values) = dataset.read_1d::<VarLenUnicode>() {
            return values.first().map(|value| value.to_string());
        }
        dataset
            .read_1d::<VarLenAscii>()
            .ok()
            .and_then(|values| values.first().map(|value| value.to_string()))
    }

    fn int(&self, key: &str) -> Option<i64> {
        let dataset = self.entry.dataset(key).ok()?;
        if let Ok(value) = dataset.read_scalar::<i64>() {
            return Some(value);
        }
        dataset
            .read_1d::<i64>()
            .ok()
            .and_then(|values| values.first().copied())
    }

    fn float(&self, key: &str) -> Option<f64> {
        let dataset = self.entry.dataset(key).ok()?;
        if let Ok(value) = dataset.read_scalar::<f64>() {
            return Some(value);
        }
        dataset
            .read_1d::<f64>()
            .ok()
            .and_then(|values| values.first().copied())
    }

    fn float_list(&self, key: &str) -> Option<Vec<f64>> {
        let dataset = self.entry.dataset(key).ok()?;
        dataset.read_1d::<f64>().ok().map(|values| values.to_vec())
    }
}

impl Ingestor for NexusIngestor {
    fn ingest(&self, path: &Path) -> Result<JobRequest, IngestError> {
        let entry = NexusEntry::open(path)?;
        build_job_request(path, &entry)
    }

    fn run_title(&self, path: &Path) -> Result<String, IngestError> {
        let entry = NexusEntry::open(path)?;
        entry.string("title").ok_or_else(|| IngestError::Malformed {
            path: path.to_path_buf(),
            reason: "missing dataset: title".to_string(),
        })
    }
}
