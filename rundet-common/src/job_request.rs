//! Job request model
//!
//! One instrument run under evaluation. Created by ingestion from a data
//! file, mutated in place by the rule chain, then serialized for the
//! downstream scheduler. Grouped/stitched variants are derived copies held in
//! `additional_requests`; derived requests never recurse further.

use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A single candidate run and its evaluation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    /// Run number, always positive
    pub run_number: u32,
    /// Instrument name as recorded in the file, e.g. "MARI"
    pub instrument: String,
    pub experiment_title: String,
    pub experiment_number: String,
    pub filepath: PathBuf,
    pub run_start: String,
    pub run_end: String,
    pub raw_frames: u64,
    pub good_frames: u64,
    pub users: String,
    /// Enrichment bag written by rules, read by later rules and downstream
    pub additional_values: BTreeMap<String, Value>,
    /// Evaluation state, never serialized
    #[serde(skip_serializing)]
    pub will_reduce: bool,
    /// Derived grouped requests, never serialized
    #[serde(skip_serializing)]
    pub additional_requests: Vec<JobRequest>,
}

impl JobRequest {
    /// Derive an independent copy carrying a replacement enrichment bag.
    ///
    /// This is how grouped/stitched requests are produced: same identity and
    /// descriptive fields, a fresh `additional_values` snapshot, and no
    /// nested `additional_requests` of its own (derived requests stay flat).
    pub fn derive_with_values(&self, additional_values: BTreeMap<String, Value>) -> JobRequest {
        JobRequest {
            run_number: self.run_number,
            instrument: self.instrument.clone(),
            experiment_title: self.experiment_title.clone(),
            experiment_number: self.experiment_number.clone(),
            filepath: self.filepath.clone(),
            run_start: self.run_start.clone(),
            run_end: self.run_end.clone(),
            raw_frames: self.raw_frames,
            good_frames: self.good_frames,
            users: self.users.clone(),
            additional_values,
            will_reduce: self.will_reduce,
            additional_requests: Vec::new(),
        }
    }

    /// Egress JSON body: exactly the metadata fields plus `additional_values`.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            run_number: 25581,
            instrument: "MARI".to_string(),
            experiment_title: "Whitebeam".to_string(),
            experiment_number: "1820497".to_string(),
            filepath: PathBuf::from("/archive/NDXMAR/MAR25581.nxs"),
            run_start: "2019-03-22T10:15:44".to_string(),
            run_end: "2019-03-22T10:18:26".to_string(),
            raw_frames: 8067,
            good_frames: 6452,
            users: "Wood,Guidi,Benedek".to_string(),
            additional_values: BTreeMap::new(),
            will_reduce: true,
            additional_requests: Vec::new(),
        }
    }

    #[test]
    fn test_serialization_excludes_evaluation_state() {
        let mut job = request();
        job.additional_values
            .insert("sum_runs".to_string(), Value::Bool(false));
        job.additional_requests
            .push(job.derive_with_values(BTreeMap::new()));

        let json = job.to_json_string().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = parsed.as_object().unwrap();

        assert!(!object.contains_key("will_reduce"));
        assert!(!object.contains_key("additional_requests"));
        assert_eq!(object["run_number"], 25581);
        assert_eq!(object["filepath"], "/archive/NDXMAR/MAR25581.nxs");
        assert_eq!(object["additional_values"]["sum_runs"], false);
        assert_eq!(object.len(), 11);
    }

    #[test]
    fn test_derived_request_is_independent() {
        let mut job = request();
        let mut values = BTreeMap::new();
        values.insert("runno".to_string(), Value::from(vec![25581u32, 25580]));
        let derived = job.derive_with_values(values);

        job.experiment_title.push_str(" (edited)");
        job.additional_values
            .insert("wbvan".to_string(), Value::Int(12345));

        assert_eq!(derived.experiment_title, "Whitebeam");
        assert!(!derived.additional_values.contains_key("wbvan"));
        assert!(derived.additional_requests.is_empty());
    }
}
