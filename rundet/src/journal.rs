//! Cycle journal mining
//!
//! Each instrument publishes an XML index of every run recorded during a
//! cycle. The scattering rules mine it to locate companion runs: the sample
//! transmission, the background ("can") scatter and transmission, and the
//! most recent direct/empty-beam measurement. Role classification works on
//! the bracket-delimited group labels embedded in each title and on the type
//! tag derived from the title's trailing token.

use regex::Regex;
use rundet_common::instrument;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Journal fetch/parse failures.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Journal XML could not be parsed: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("No journal exists for cycle {0}")]
    UnknownCycle(String),
}

/// One run recorded in a cycle journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub title: String,
    /// Trailing token of the title, e.g. `TRANS` or `SANS/TRANS`
    pub type_tag: String,
    pub run_number: u32,
}

impl JournalRecord {
    pub fn new(title: impl Into<String>, run_number: u32) -> Self {
        let title = title.into();
        let type_tag = title.rsplit('_').next().unwrap_or_default().to_string();
        Self {
            title,
            type_tag,
            run_number,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawJournal {
    #[serde(rename = "NXentry", default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    title: Option<RawText>,
    run_number: Option<RawText>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    #[serde(rename = "$text")]
    value: Option<String>,
}

/// Parse a journal XML document into its run records, in document order.
/// Entries without a title or a numeric run number are skipped.
pub fn parse_journal(xml: &str) -> Result<Vec<JournalRecord>, JournalError> {
    let raw: RawJournal = quick_xml::de::from_str(xml)?;
    let records = raw
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry.title?.value?.trim().to_string();
            let run_number = entry.run_number?.value?.trim().parse::<u32>().ok()?;
            Some(JournalRecord::new(title, run_number))
        })
        .collect();
    Ok(records)
}

/// HTTP client for the journal index service.
pub struct JournalClient {
    http: reqwest::Client,
    base_url: String,
}

impl JournalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch and parse the journal for one instrument cycle.
    pub async fn cycle_index(
        &self,
        instrument_name: &str,
        cycle: &str,
    ) -> Result<Vec<JournalRecord>, JournalError> {
        let filename = instrument::journal_filename(cycle)
            .ok_or_else(|| JournalError::UnknownCycle(cycle.to_string()))?;
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            instrument::ndx_name(instrument_name),
            filename
        );
        debug!("Fetching cycle journal: {url}");
        let xml = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_journal(&xml)
    }
}

fn group_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{.*?\}").expect("static regex"))
}

/// All bracket-delimited group labels in a title, e.g. `{Apple}_{Banana}_SANS/TRANS`
/// yields `["{Apple}", "{Banana}"]`.
pub fn group_labels(title: &str) -> Vec<&str> {
    group_label_regex()
        .find_iter(title)
        .map(|m| m.as_str())
        .collect()
}

/// Drop every record at or after the scatter run. Journals are recorded in
/// run order, so the scan stops at the first ineligible record.
pub fn strip_excess_records(records: &[JournalRecord], scatter_run: u32) -> &[JournalRecord] {
    let end = records
        .iter()
        .position(|record| record.run_number >= scatter_run)
        .unwrap_or(records.len());
    &records[..end]
}

fn is_sample_transmission(record: &JournalRecord, sample_title: &str) -> bool {
    record.title.contains(sample_title) && record.type_tag == "TRANS"
}

fn is_direct(record: &JournalRecord) -> bool {
    let lower = record.title.to_lowercase();
    (lower.contains("direct") || lower.contains("empty")) && record.type_tag == "TRANS"
}

fn is_can_scatter(record: &JournalRecord, can_title: &str) -> bool {
    let labels = group_labels(&record.title);
    labels.len() == 1 && labels[0] == can_title && record.type_tag == "SANS/TRANS"
}

fn is_can_transmission(record: &JournalRecord, can_title: &str) -> bool {
    record.title.contains(can_title) && record.type_tag == "TRANS"
}

/// First transmission record for the sample, scanning forward.
pub fn find_trans_file<'a>(
    records: &'a [JournalRecord],
    sample_title: &str,
) -> Option<&'a JournalRecord> {
    records
        .iter()
        .find(|record| is_sample_transmission(record, sample_title))
}

/// Most recent direct/empty-beam record, scanning in reverse: the nearest
/// preceding direct-beam measurement is preferred.
pub fn find_direct_file(records: &[JournalRecord]) -> Option<&JournalRecord> {
    records.iter().rev().find(|record| is_direct(record))
}

/// First can-scatter record for the can label, scanning forward.
pub fn find_can_scatter_file<'a>(
    records: &'a [JournalRecord],
    can_title: &str,
) -> Option<&'a JournalRecord> {
    records
        .iter()
        .find(|record| is_can_scatter(record, can_title))
}

/// First can-transmission record for the can label, scanning forward.
pub fn find_can_trans_file<'a>(
    records: &'a [JournalRecord],
    can_title: &str,
) -> Option<&'a JournalRecord> {
    records
        .iter()
        .find(|record| is_can_transmission(record, can_title))
}
