// NVD page parser: one page -> CVE rows + CVSS rows

use super::models::{
    AttackComplexity, AttackVector, BaseSeverity, CvePage, Cve, CvssMetric, Impact, RecordType,
};
use crate::error::{IngestError, Result};
use regex::Regex;
use secfeed_common::types::parse_timestamp;
use secfeed_common::{FieldValue, Record};
use std::str::FromStr;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\n\r]+").expect("static pattern"));

/// Records extracted from one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvdRecords {
    pub cves: Vec<Record>,
    pub cvss: Vec<Record>,
}

#[derive(Debug, Clone, Copy)]
pub struct NvdParser {
    primary_only: bool,
}

impl NvdParser {
    pub fn new(primary_only: bool) -> Self {
        Self { primary_only }
    }

    pub fn parse_page(&self, page: &[u8]) -> Result<NvdRecords> {
        let page: CvePage = serde_json::from_slice(page)?;
        let mut records = NvdRecords::default();

        for item in &page.vulnerabilities {
            let cve = &item.cve;
            records.cves.push(cve_record(cve)?);
            for metric in cve.metrics.all() {
                let keep = !self.primary_only || metric.record_type.as_deref() == Some("Primary");
                if keep {
                    records.cvss.push(cvss_record(&cve.id, metric)?);
                }
            }
        }
        Ok(records)
    }
}

/// English description, trimmed, with runs of line breaks collapsed to one space
pub fn english_description(cve: &Cve) -> Option<String> {
    cve.descriptions
        .iter()
        .find(|d| d.lang == "en")
        .map(|d| LINE_BREAKS.replace_all(d.value.trim(), " ").into_owned())
}

fn cve_record(cve: &Cve) -> Result<Record> {
    Ok(Record::new()
        .with("cve_id", cve.id.as_str())
        .with("source_id", cve.source_identifier.clone())
        .with("published_datetime", timestamp(cve.published.as_deref())?)
        .with("last_modified_datetime", timestamp(cve.last_modified.as_deref())?)
        .with("status", cve.vuln_status.clone())
        .with("description", english_description(cve)))
}

fn cvss_record(cve_id: &str, metric: &CvssMetric) -> Result<Record> {
    let data = &metric.cvss_data;
    let (attack_vector, attack_complexity, base_severity) = if data.is_v2() {
        (&data.access_vector, &data.access_complexity, &metric.base_severity)
    } else {
        (&data.attack_vector, &data.attack_complexity, &data.base_severity)
    };

    Ok(Record::new()
        .with("cve_id", cve_id)
        .with("version", data.version.as_str())
        .with("source", metric.source.clone())
        .with("type", closed::<RecordType>(&metric.record_type)?)
        .with("vector_string", data.vector_string.clone())
        .with("attack_vector", closed::<AttackVector>(attack_vector)?)
        .with("attack_complexity", closed::<AttackComplexity>(attack_complexity)?)
        .with("confidentiality_impact", closed::<Impact>(&data.confidentiality_impact)?)
        .with("integrity_impact", closed::<Impact>(&data.integrity_impact)?)
        .with("availability_impact", closed::<Impact>(&data.availability_impact)?)
        .with("base_score", data.base_score)
        .with("base_severity", closed::<BaseSeverity>(base_severity)?)
        .with("exploitability_score", metric.exploitability_score)
        .with("impact_score", metric.impact_score))
}

fn closed<T>(text: &Option<String>) -> Result<FieldValue>
where
    T: FromStr<Err = secfeed_common::SecfeedError> + Into<FieldValue>,
{
    Ok(text.as_deref().map(T::from_str).transpose()?.into())
}

fn timestamp(text: Option<&str>) -> Result<FieldValue> {
    text.map(parse_timestamp)
        .transpose()
        .map(FieldValue::from)
        .map_err(IngestError::from)
}
