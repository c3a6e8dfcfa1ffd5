//! Instrument-specific metadata extraction
//!
//! After the common metadata is read, each instrument family contributes the
//! extra values its rules consume. Instruments without an entry here need
//! nothing beyond the common record.

use super::{IngestError, NexusData};
use rundet_common::{instrument, JobRequest, Value};
use tracing::info;

/// Apply the owning instrument's extraction pass to a freshly built request.
pub fn enrich(job_request: &mut JobRequest, data: &dyn NexusData) -> Result<(), IngestError> {
    match job_request.instrument.to_lowercase().as_str() {
        "mari" => mari_extract(job_request, data),
        "tosca" => tosca_extract(job_request),
        "osiris" | "iris" => osiris_and_iris_extract(job_request, data),
        "loq" | "sans2d" => sans_extract(job_request, data),
        _ => {
            info!(
                "No additional extraction needed for {} run {}",
                job_request.instrument, job_request.run_number
            );
            Ok(())
        }
    }
}

fn cycle_string(job_request: &JobRequest) -> Result<Value, IngestError> {
    instrument::cycle_string_from_path(&job_request.filepath)
        .map(Value::Str)
        .ok_or_else(|| IngestError::Malformed {
            path: job_request.filepath.clone(),
            reason: "unable to build a cycle string from the file path".to_string(),
        })
}

/// MARI: incident energy, sample mass/rmm, monovan run and background flag.
/// Absent datasets fall back to the reduction script's defaults.
fn mari_extract(job_request: &mut JobRequest, data: &dyn NexusData) -> Result<(), IngestError> {
    let ei = match data.float_list("ei") {
        Some(values) if values.len() == 1 => Value::Float(values[0]),
        Some(values) if values.len() > 1 => {
            Value::List(values.into_iter().map(Value::Float).collect())
        }
        // The script consumer expects the literal quoted string
        _ => Value::Str("'auto'".to_string()),
    };

    let sam_mass = data.float("sam_mass").unwrap_or(0.0);
    let sam_rmm = data.float("sam_rmm").unwrap_or(0.0);
    let remove_bkg = data.int("remove_bkg").map(|v| v != 0).unwrap_or(false);
    let monovan = if sam_rmm != 0.0 && sam_mass != 0.0 {
        job_request.run_number
    } else {
        0
    };

    let values = &mut job_request.additional_values;
    values.insert("ei".to_string(), ei);
    values.insert("sam_mass".to_string(), Value::Float(sam_mass));
    values.insert("sam_rmm".to_string(), Value::Float(sam_rmm));
    values.insert("monovan".to_string(), Value::from(monovan));
    values.insert("remove_bkg".to_string(), Value::Bool(remove_bkg));
    values.insert("sum_runs".to_string(), Value::Bool(false));
    values.insert("runno".to_string(), Value::from(job_request.run_number));
    Ok(())
}

fn tosca_extract(job_request: &mut JobRequest) -> Result<(), IngestError> {
    let cycle = cycle_string(job_request)?;
    job_request
        .additional_values
        .insert("cycle_string".to_string(), cycle);
    Ok(())
}

/// LOQ and SANS2D: cycle string plus the sample geometry the script needs.
fn sans_extract(job_request: &mut JobRequest, data: &dyn NexusData) -> Result<(), IngestError> {
    let cycle = cycle_string(job_request)?;
    let read_float = |key: &str| {
        data.float(key).ok_or_else(|| IngestError::Malformed {
            path: job_request.filepath.clone(),
            reason: format!("missing dataset: {key}"),
        })
    };

    let thickness = read_float("sample/thickness")?;
    let height = read_float("sample/height")?;
    let width = read_float("sample/width")?;
    let shape = data
        .string("sample/shape")
        .ok_or_else(|| IngestError::Malformed {
            path: job_request.filepath.clone(),
            reason: "missing dataset: sample/shape".to_string(),
        })?;

    let values = &mut job_request.additional_values;
    values.insert("cycle_string".to_string(), cycle);
    values.insert("sample_thickness".to_string(), Value::Float(thickness));
    values.insert("sample_geometry".to_string(), Value::Str(shape));
    values.insert("sample_height".to_string(), Value::Float(height));
    values.insert("sample_width".to_string(), Value::Float(width));
    Ok(())
}

/// OSIRIS and IRIS: chopper frequencies and phases plus the detector and
/// monitor time-channel boundaries the mode classifiers consult.
fn osiris_and_iris_extract(
    job_request: &mut JobRequest,
    data: &dyn NexusData,
) -> Result<(), IngestError> {
    let cycle = cycle_string(job_request)?;

    let read = |key: &str| {
        data.float(key).ok_or_else(|| IngestError::Malformed {
            path: job_request.filepath.clone(),
            reason: format!("missing dataset: {key}"),
        })
    };

    let mut freq_6 = read("selog/freq6/value_log/value")?;
    let mut freq_10 = read("selog/freq10/value_log/value")?;

    // The two channels record the same physical frequency; a disagreement
    // beyond 1% means the file cannot be classified at all.
    let max_value = freq_6.max(freq_10);
    if (freq_6 - freq_10).abs() > max_value * 0.01 {
        return Err(IngestError::ReductionMetadata(
            "frequency channels 6 and 10 are not within 1% of each other".to_string(),
        ));
    }
    if freq_6 != freq_10 {
        freq_6 = freq_6.round();
        freq_10 = freq_10.round();
    }

    let phase_6 = read("selog/phase6/value")?;
    let phase_10 = read("selog/phase10/value")?;

    let tcb = |key: &str| {
        let channels = data
            .float_list(key)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| IngestError::Malformed {
                path: job_request.filepath.clone(),
                reason: format!("missing dataset: {key}"),
            })?;
        let min = channels.iter().copied().fold(f64::INFINITY, f64::min);
        let max = channels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok::<(f64, f64), IngestError>((min, max))
    };
    let (detector_min, detector_max) = tcb("instrument/dae/time_channels_1/time_of_flight")?;
    let (monitor_min, monitor_max) = tcb("instrument/dae/time_channels_2/time_of_flight")?;

    let values = &mut job_request.additional_values;
    values.insert("cycle_string".to_string(), cycle);
    values.insert("freq6".to_string(), Value::Float(freq_6));
    values.insert("freq10".to_string(), Value::Float(freq_10));
    values.insert("phase6".to_string(), Value::Float(phase_6));
    values.insert("phase10".to_string(), Value::Float(phase_10));
    values.insert("tcb_detector_min".to_string(), Value::Float(detector_min));
    values.insert("tcb_detector_max".to_string(), Value::Float(detector_max));
    values.insert("tcb_monitor_min".to_string(), Value::Float(monitor_min));
    values.insert("tcb_monitor_max".to_string(), Value::Float(monitor_max));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::build_job_request;
    use std::collections::HashMap;
    use std::path::Path;

    /// In-memory record standing in for a decoded data file.
    #[derive(Default)]
    pub struct StubData {
        pub strings: HashMap<String, String>,
        pub ints: HashMap<String, i64>,
        pub floats: HashMap<String, f64>,
        pub float_lists: HashMap<String, Vec<f64>>,
    }

    impl NexusData for StubData {
        fn string(&self, key: &str) -> Option<String> {
            self.strings.get(key).cloned()
        }
        fn int(&self, key: &str) -> Option<i64> {
            self.ints.get(key).copied()
        }
        fn float(&self, key: &str) -> Option<f64> {
            self.floats.get(key).copied()
        }
        fn float_list(&self, key: &str) -> Option<Vec<f64>> {
            self.float_lists.get(key).cloned()
        }
    }

    fn mari_record() -> StubData {
        let mut data = StubData::default();
        data.ints.insert("run_number".to_string(), 25581);
        data.ints.insert("raw_frames".to_string(), 8067);
        data.ints.insert("good_frames".to_string(), 6452);
        for (key, value) in [
            ("beamline", "MARI"),
            ("title", "Whitebeam - vanadium - detector tests - vacuum bad - HT on not on all LAB"),
            ("experiment_identifier", "1820497"),
            ("start_time", "2019-03-22T10:15:44"),
            ("end_time", "2019-03-22T10:18:26"),
            ("user_1/name", "Wood,Guidi,Benedek"),
        ] {
            data.strings.insert(key.to_string(), value.to_string());
        }
        data
    }

    #[test]
    fn test_mari_golden_record() {
        let data = mari_record();
        let job = build_job_request(Path::new("/archive/cycle_19_1/MAR25581.nxs"), &data).unwrap();

        assert_eq!(job.run_number, 25581);
        assert_eq!(job.additional_values["ei"], Value::Str("'auto'".to_string()));
        assert_eq!(job.additional_values["monovan"], Value::Int(0));
        assert_eq!(job.additional_values["sum_runs"], Value::Bool(false));
        assert_eq!(job.additional_values["runno"], Value::Int(25581));
        assert_eq!(job.additional_values["sam_mass"], Value::Float(0.0));
        assert_eq!(job.additional_values["remove_bkg"], Value::Bool(false));
    }

    #[test]
    fn test_mari_monovan_set_when_sample_present() {
        let mut data = mari_record();
        data.floats.insert("sam_mass".to_string(), 10.0);
        data.floats.insert("sam_rmm".to_string(), 50.5);
        data.float_lists.insert("ei".to_string(), vec![12.0, 25.0]);

        let job = build_job_request(Path::new("/archive/cycle_19_1/MAR25581.nxs"), &data).unwrap();
        assert_eq!(job.additional_values["monovan"], Value::Int(25581));
        assert_eq!(
            job.additional_values["ei"],
            Value::List(vec![Value::Float(12.0), Value::Float(25.0)])
        );
    }

    fn osiris_record() -> StubData {
        let mut data = StubData::default();
        data.ints.insert("run_number".to_string(), 108539);
        data.ints.insert("raw_frames".to_string(), 1000);
        data.ints.insert("good_frames".to_string(), 950);
        for (key, value) in [
            ("beamline", "OSIRIS"),
            ("title", "quartz sample run"),
            ("experiment_identifier", "2310001"),
            ("start_time", "2023-01-01T00:00:00"),
            ("end_time", "2023-01-01T01:00:00"),
            ("user_1/name", "Jones"),
        ] {
            data.strings.insert(key.to_string(), value.to_string());
        }
        data.floats.insert("selog/freq6/value_log/value".to_string(), 25.0);
        data.floats.insert("selog/freq10/value_log/value".to_string(), 25.0);
        data.floats.insert("selog/phase6/value".to_string(), 8573.0);
        data.floats.insert("selog/phase10/value".to_string(), 14250.0);
        data.float_lists.insert(
            "instrument/dae/time_channels_1/time_of_flight".to_string(),
            vec![40200.0, 60000.0, 80200.0],
        );
        data.float_lists.insert(
            "instrument/dae/time_channels_2/time_of_flight".to_string(),
            vec![45900.0, 50000.0, 65900.0],
        );
        data
    }

    #[test]
    fn test_osiris_extract_tcb_bounds() {
        let data = osiris_record();
        let job = build_job_request(
            Path::new("/archive/NDXOSIRIS/Instrument/data/cycle_23_1/OSIRIS00108539.nxs"),
            &data,
        )
        .unwrap();

        assert_eq!(job.additional_values["cycle_string"], Value::from("cycle_23_1"));
        assert_eq!(job.additional_values["tcb_detector_min"], Value::Float(40200.0));
        assert_eq!(job.additional_values["tcb_detector_max"], Value::Float(80200.0));
        assert_eq!(job.additional_values["tcb_monitor_min"], Value::Float(45900.0));
        assert_eq!(job.additional_values["tcb_monitor_max"], Value::Float(65900.0));
    }

    #[test]
    fn test_osiris_frequency_mismatch_is_metadata_error() {
        let mut data = osiris_record();
        data.floats.insert("selog/freq6/value_log/value".to_string(), 25.0);
        data.floats.insert("selog/freq10/value_log/value".to_string(), 50.0);

        let result = build_job_request(
            Path::new("/archive/cycle_23_1/OSIRIS00108539.nxs"),
            &data,
        );
        assert!(matches!(result, Err(IngestError::ReductionMetadata(_))));
    }

    #[test]
    fn test_close_frequencies_are_rounded() {
        let mut data = osiris_record();
        data.floats.insert("selog/freq6/value_log/value".to_string(), 49.8);
        data.floats.insert("selog/freq10/value_log/value".to_string(), 50.1);

        let job = build_job_request(
            Path::new("/archive/cycle_23_1/OSIRIS00108539.nxs"),
            &data,
        )
        .unwrap();
        assert_eq!(job.additional_values["freq6"], Value::Float(50.0));
        assert_eq!(job.additional_values["freq10"], Value::Float(50.0));
    }

    #[test]
    fn test_wrong_extension_rejected() {
        let data = mari_record();
        let result = build_job_request(Path::new("/archive/cycle_19_1/MAR25581.log"), &data);
        assert!(matches!(result, Err(IngestError::NotNexusFile(_))));
    }

    #[test]
    fn test_missing_required_metadata_is_malformed() {
        let mut data = mari_record();
        data.strings.remove("title");
        let result = build_job_request(Path::new("/archive/cycle_19_1/MAR25581.nxs"), &data);
        assert!(matches!(result, Err(IngestError::Malformed { .. })));
    }
}
