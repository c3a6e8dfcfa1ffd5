//! Instrument rules
//!
//! A rule is one configured policy unit evaluated against a job request. The
//! rule set is closed: every configuration key maps to exactly one variant of
//! [`Rule`], and [`Rule::from_key`] is the registry. New instrument behavior
//! means a new variant plus a registry entry, never runtime extension.
//!
//! `verify` may leave the request untouched, enrich `additional_values`,
//! clear `will_reduce`, or signal a [`RuleError::Violation`] - an expected
//! per-rule "not met" outcome, distinct from a crash. "Rule not applicable"
//! is expressed by leaving state unchanged, never by an error.

pub mod common;
pub mod enginx;
pub mod imat;
pub mod inter;
pub mod iris;
pub mod loq;
pub mod mari;
pub mod osiris;
pub mod sans;
pub mod tosca;
pub mod vesuvio;

#[cfg(test)]
pub mod probe;
#[cfg(test)]
pub mod testing;

use crate::ingest::{IngestError, Ingestor};
use crate::journal::{JournalClient, JournalError};
use crate::path_search::RunFileFinder;
use regex::Regex;
use rundet_common::{JobRequest, Value};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Failure modes of a single rule evaluation.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The run does not meet this rule's requirement; clears `will_reduce`
    /// and halts the chain, but is not a processing failure
    #[error("Rule violation: {0}")]
    Violation(String),

    /// A neighbouring file could not be read during a stitch walk
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// The cycle journal could not be fetched or parsed
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuleError {
    pub fn violation(reason: impl Into<String>) -> Self {
        RuleError::Violation(reason.into())
    }
}

/// Configuration errors raised while building a specification; fatal for the
/// instrument until its configuration is fixed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleConfigError {
    #[error("Implementation of rule {0} does not exist")]
    MissingRule(String),

    #[error("Invalid configuration for rule {key}: expected {expected}")]
    InvalidConfiguration { key: String, expected: &'static str },
}

/// External collaborators a rule may consult during `verify`.
pub struct RuleContext<'a> {
    pub ingestor: &'a dyn Ingestor,
    pub journal: &'a JournalClient,
    pub finder: &'a RunFileFinder,
    pub imat_root: &'a Path,
}

/// The closed rule set.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Enabled(common::EnabledRule),
    InterStitch(inter::InterStitchRule),
    ToscaStitch(tosca::ToscaStitchRule),
    MariStitch(mari::MariStitchRule),
    MariMaskFile(mari::MariMaskFileRule),
    MariWbvan(mari::MariWbvanRule),
    VesuvioStitch(vesuvio::VesuvioStitchRule),
    VesuvioEmptyRuns(vesuvio::VesuvioEmptyRunsRule),
    VesuvioIpFile(vesuvio::VesuvioIpFileRule),
    OsirisStitch(osiris::OsirisStitchRule),
    OsirisReductionMode(osiris::OsirisReductionModeRule),
    OsirisReflectionCalibration(osiris::OsirisReflectionCalibrationRule),
    OsirisDefaultSpectroscopy(osiris::OsirisDefaultSpectroscopy),
    OsirisDefaultGraniteAnalyser(osiris::OsirisDefaultGraniteAnalyser),
    IrisReduction(iris::IrisReductionRule),
    IrisCalibration(iris::IrisCalibrationRule),
    CheckIfScatterSans(sans::CheckIfScatterSans),
    SansUserFile(sans::SansUserFile),
    SansSliceWavs(sans::SansSliceWavs),
    SansPhiLimits(sans::SansPhiLimits),
    LoqUserFile(loq::LoqUserFile),
    LoqFindFiles(loq::LoqFindFiles),
    EnginxGroup(enginx::EnginxGroupRule),
    EnginxCeriaPath(enginx::EnginxPathRule),
    EnginxVanadiumPath(enginx::EnginxPathRule),
    ImatFindImages(imat::ImatFindImagesRule),
    #[cfg(test)]
    Probe(probe::ProbeRule),
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, RuleConfigError> {
    value
        .as_bool()
        .ok_or_else(|| RuleConfigError::InvalidConfiguration {
            key: key.to_string(),
            expected: "boolean",
        })
}

fn expect_string(key: &str, value: &Value) -> Result<String, RuleConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RuleConfigError::InvalidConfiguration {
            key: key.to_string(),
            expected: "string",
        })
}

fn expect_int(key: &str, value: &Value) -> Result<i64, RuleConfigError> {
    value
        .as_i64()
        .ok_or_else(|| RuleConfigError::InvalidConfiguration {
            key: key.to_string(),
            expected: "integer",
        })
}

fn expect_map(
    key: &str,
    value: &Value,
) -> Result<std::collections::BTreeMap<String, Value>, RuleConfigError> {
    value
        .as_map()
        .cloned()
        .ok_or_else(|| RuleConfigError::InvalidConfiguration {
            key: key.to_string(),
            expected: "mapping",
        })
}

fn trailing_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)$").unwrap())
}

/// Run-number values may be configured as an integer or as a string holding
/// trailing digits (e.g. `"ENGINX0000193749"`); both coerce to the run.
fn expect_run_number(key: &str, value: &Value) -> Result<u32, RuleConfigError> {
    let invalid = || RuleConfigError::InvalidConfiguration {
        key: key.to_string(),
        expected: "positive run number (integer or string with trailing digits)",
    };
    match value {
        Value::Int(i) => u32::try_from(*i).ok().filter(|run| *run > 0).ok_or_else(invalid),
        Value::Str(s) => trailing_digits()
            .captures(s.trim())
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|run| *run > 0)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

impl Rule {
    /// The registry: map a lower-cased configuration key and its typed value
    /// to a concrete rule.
    pub fn from_key(key: &str, value: &Value) -> Result<Rule, RuleConfigError> {
        let rule = match key.to_lowercase().as_str() {
            "enabled" => Rule::Enabled(common::EnabledRule::new(expect_bool(key, value)?)),
            "interstitch" => {
                Rule::InterStitch(inter::InterStitchRule::new(expect_bool(key, value)?))
            }
            "toscastitch" => {
                Rule::ToscaStitch(tosca::ToscaStitchRule::new(expect_bool(key, value)?))
            }
            "maristitch" => Rule::MariStitch(mari::MariStitchRule::new(expect_bool(key, value)?)),
            "marimaskfile" => {
                Rule::MariMaskFile(mari::MariMaskFileRule::new(expect_string(key, value)?))
            }
            "mariwbvan" => Rule::MariWbvan(mari::MariWbvanRule::new(expect_int(key, value)?)),
            "vesuviostitch" => {
                Rule::VesuvioStitch(vesuvio::VesuvioStitchRule::new(expect_bool(key, value)?))
            }
            "vesuvioemptyruns" => {
                Rule::VesuvioEmptyRuns(vesuvio::VesuvioEmptyRunsRule::new(expect_string(key, value)?))
            }
            "vesuvioipfile" => {
                Rule::VesuvioIpFile(vesuvio::VesuvioIpFileRule::new(expect_string(key, value)?))
            }
            "osirisstitch" => {
                Rule::OsirisStitch(osiris::OsirisStitchRule::new(expect_bool(key, value)?))
            }
            "osirisreductionmode" => Rule::OsirisReductionMode(
                osiris::OsirisReductionModeRule::new(expect_bool(key, value)?),
            ),
            "osiriscalibfilesandreflection" => Rule::OsirisReflectionCalibration(
                osiris::OsirisReflectionCalibrationRule::new(expect_map(key, value)?),
            ),
            "osirisdefaultspectroscopy" => Rule::OsirisDefaultSpectroscopy(
                osiris::OsirisDefaultSpectroscopy::new(expect_bool(key, value)?),
            ),
            "osirisdefaultgraniteanalyser" => Rule::OsirisDefaultGraniteAnalyser(
                osiris::OsirisDefaultGraniteAnalyser::new(expect_bool(key, value)?),
            ),
            "irisreduction" => {
                Rule::IrisReduction(iris::IrisReductionRule::new(expect_bool(key, value)?))
            }
            "iriscalibration" => {
                Rule::IrisCalibration(iris::IrisCalibrationRule::new(expect_map(key, value)?))
            }
            "checkifscattersans" => {
                Rule::CheckIfScatterSans(sans::CheckIfScatterSans::new(expect_bool(key, value)?))
            }
            "sansuserfile" => Rule::SansUserFile(sans::SansUserFile::new(expect_string(key, value)?)),
            "sansslicewavs" => {
                Rule::SansSliceWavs(sans::SansSliceWavs::new(expect_string(key, value)?))
            }
            "sansphilimits" => {
                Rule::SansPhiLimits(sans::SansPhiLimits::new(expect_string(key, value)?))
            }
            "loquserfile" => Rule::LoqUserFile(loq::LoqUserFile::new(expect_string(key, value)?)),
            "loqfindfiles" => Rule::LoqFindFiles(loq::LoqFindFiles::new(expect_bool(key, value)?)),
            "enginxgroup" => {
                Rule::EnginxGroup(enginx::EnginxGroupRule::new(expect_string(key, value)?))
            }
            "enginxceriarun" => Rule::EnginxCeriaPath(enginx::EnginxPathRule::ceria(
                expect_run_number(key, value)?,
            )),
            "enginxvanadiumrun" => Rule::EnginxVanadiumPath(enginx::EnginxPathRule::vanadium(
                expect_run_number(key, value)?,
            )),
            "imatfindimages" => {
                Rule::ImatFindImages(imat::ImatFindImagesRule::new(expect_bool(key, value)?))
            }
            _ => return Err(RuleConfigError::MissingRule(key.to_string())),
        };
        Ok(rule)
    }

    /// Ordering hint: enrichment rules other rules depend on.
    pub fn should_be_first(&self) -> bool {
        match self {
            Rule::SansUserFile(_) => true,
            #[cfg(test)]
            Rule::Probe(probe) => probe.first,
            _ => false,
        }
    }

    /// Ordering hint: rules that must observe the fully enriched request.
    /// Every rule that derives grouped requests runs last, because the
    /// derived copy snapshots the current enrichment bag.
    pub fn should_be_last(&self) -> bool {
        match self {
            Rule::ToscaStitch(_)
            | Rule::MariStitch(_)
            | Rule::VesuvioStitch(_)
            | Rule::OsirisStitch(_)
            | Rule::IrisCalibration(_)
            | Rule::LoqFindFiles(_) => true,
            #[cfg(test)]
            Rule::Probe(probe) => probe.last,
            _ => false,
        }
    }

    /// Evaluate this rule against the job request.
    pub async fn verify(
        &self,
        job_request: &mut JobRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(), RuleError> {
        match self {
            Rule::Enabled(rule) => rule.verify(job_request),
            Rule::InterStitch(rule) => rule.verify(job_request, ctx),
            Rule::ToscaStitch(rule) => rule.verify(job_request, ctx),
            Rule::MariStitch(rule) => rule.verify(job_request, ctx),
            Rule::MariMaskFile(rule) => rule.verify(job_request),
            Rule::MariWbvan(rule) => rule.verify(job_request),
            Rule::VesuvioStitch(rule) => rule.verify(job_request, ctx),
            Rule::VesuvioEmptyRuns(rule) => rule.verify(job_request),
            Rule::VesuvioIpFile(rule) => rule.verify(job_request),
            Rule::OsirisStitch(rule) => rule.verify(job_request, ctx),
            Rule::OsirisReductionMode(rule) => rule.verify(job_request),
            Rule::OsirisReflectionCalibration(rule) => rule.verify(job_request),
            Rule::OsirisDefaultSpectroscopy(rule) => rule.verify(job_request),
            Rule::OsirisDefaultGraniteAnalyser(rule) => rule.verify(job_request),
            Rule::IrisReduction(rule) => rule.verify(job_request),
            Rule::IrisCalibration(rule) => rule.verify(job_request),
            Rule::CheckIfScatterSans(rule) => rule.verify(job_request),
            Rule::SansUserFile(rule) => rule.verify(job_request),
            Rule::SansSliceWavs(rule) => rule.verify(job_request),
            Rule::SansPhiLimits(rule) => rule.verify(job_request),
            Rule::LoqUserFile(rule) => rule.verify(job_request),
            Rule::LoqFindFiles(rule) => rule.verify(job_request, ctx).await,
            Rule::EnginxGroup(rule) => rule.verify(job_request),
            Rule::EnginxCeriaPath(rule) | Rule::EnginxVanadiumPath(rule) => {
                rule.verify(job_request, ctx).await
            }
            Rule::ImatFindImages(rule) => rule.verify(job_request, ctx),
            #[cfg(test)]
            Rule::Probe(rule) => rule.verify(job_request),
        }
    }
}
