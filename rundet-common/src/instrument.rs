//! Instrument archive conventions
//!
//! Filename and directory layout rules for the instrument data archive:
//! `.../data/cycle_{year}_{num}/{PREFIX}{run number}.nxs` with a companion
//! journal index at `.../logs/journal/journal_{year}_{num}.xml`. Filename
//! prefixes and zero padding vary per instrument family but are always a
//! deterministic function of run number.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn cycle_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"cycle_(\d+)_(\d+)").expect("static regex"))
}

/// Filename of the given run for an instrument, e.g. `MAR25581.nxs`,
/// `TSC25236.nxs`, `OSIRIS00108539.nxs`.
pub fn run_filename(instrument: &str, run_number: u32) -> String {
    match instrument.to_uppercase().as_str() {
        "TOSCA" => format!("TSC{run_number}.nxs"),
        "MARI" => format!("MAR{run_number}.nxs"),
        other => format!("{other}{run_number:08}.nxs"),
    }
}

/// Extract the cycle string, e.g. `cycle_19_2`, from a data file path.
pub fn cycle_string_from_path(path: &Path) -> Option<String> {
    cycle_regex()
        .find(path.to_string_lossy().as_ref())
        .map(|m| m.as_str().to_string())
}

/// Split a cycle string into its year and number parts.
pub fn cycle_parts(cycle: &str) -> Option<(&str, &str)> {
    let captures = cycle_regex().captures(cycle)?;
    Some((
        captures.get(1)?.as_str(),
        captures.get(2)?.as_str(),
    ))
}

/// Journal index filename for a cycle, e.g. `journal_19_2.xml`.
pub fn journal_filename(cycle: &str) -> Option<String> {
    cycle_parts(cycle).map(|(year, num)| format!("journal_{year}_{num}.xml"))
}

/// Journal site directory name for an instrument, e.g. `ndxloq`.
pub fn ndx_name(instrument: &str) -> String {
    format!("ndx{}", instrument.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_run_filename_per_family() {
        assert_eq!(run_filename("TOSCA", 25236), "TSC25236.nxs");
        assert_eq!(run_filename("tosca", 25236), "TSC25236.nxs");
        assert_eq!(run_filename("MARI", 25581), "MAR25581.nxs");
        assert_eq!(run_filename("OSIRIS", 108539), "OSIRIS00108539.nxs");
        assert_eq!(run_filename("LOQ", 12345), "LOQ00012345.nxs");
    }

    #[test]
    fn test_cycle_string_from_path() {
        let path = PathBuf::from("/archive/NDXLOQ/Instrument/data/cycle_19_2/LOQ00012345.nxs");
        assert_eq!(cycle_string_from_path(&path).as_deref(), Some("cycle_19_2"));
        assert_eq!(cycle_string_from_path(Path::new("/tmp/LOQ.nxs")), None);
    }

    #[test]
    fn test_journal_filename() {
        assert_eq!(journal_filename("cycle_19_2").as_deref(), Some("journal_19_2.xml"));
        assert_eq!(journal_filename("not-a-cycle"), None);
    }

    #[test]
    fn test_ndx_name() {
        assert_eq!(ndx_name("LOQ"), "ndxloq");
    }
}
