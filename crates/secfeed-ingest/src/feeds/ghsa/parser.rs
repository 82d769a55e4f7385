// GitHub advisory page parsers

use super::models::{
    AdvisoriesData, AdvisoryNode, GraphqlPage, Severity, VulnerabilitiesData, VulnerabilityNode,
};
use crate::error::{IngestError, Result};
use secfeed_common::types::parse_timestamp;
use secfeed_common::{FieldValue, Record};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Records extracted from one `securityAdvisories` page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvisoryRecords {
    pub advisories: Vec<Record>,
    pub identifiers: Vec<Record>,
}

/// Integrity check for GraphQL pages: a body carrying `errors` is rejected
/// even when the HTTP status was 200
pub fn reject_graphql_errors(page: &[u8]) -> std::result::Result<(), String> {
    let doc: Value = serde_json::from_slice(page).map_err(|e| e.to_string())?;
    match doc.get("errors") {
        Some(errors) => Err(format!("GraphQL errors: {errors}")),
        None => Ok(()),
    }
}

fn data<T: DeserializeOwned>(page: &[u8]) -> Result<T> {
    let page: GraphqlPage<T> = serde_json::from_slice(page)?;
    if !page.errors.is_empty() {
        return Err(IngestError::Payload(format!("{} GraphQL errors in page", page.errors.len())));
    }
    page.data
        .ok_or_else(|| IngestError::Payload("GraphQL page without data".to_string()))
}

pub fn parse_advisories(page: &[u8]) -> Result<AdvisoryRecords> {
    let data: AdvisoriesData = data(page)?;
    let mut records = AdvisoryRecords::default();
    for node in &data.security_advisories.nodes {
        records.advisories.push(advisory_record(node)?);
        records.identifiers.extend(
            node.identifiers
                .iter()
                .filter(|identifier| identifier.id_type != "GHSA")
                .map(|identifier| {
                    Record::new()
                        .with("ghsa_id", node.ghsa_id.as_str())
                        .with("identifier_type", identifier.id_type.as_str())
                        .with("identifier", identifier.value.as_str())
                }),
        );
    }
    Ok(records)
}

pub fn parse_vulnerabilities(page: &[u8]) -> Result<Vec<Record>> {
    let data: VulnerabilitiesData = data(page)?;
    data.security_vulnerabilities
        .nodes
        .iter()
        .map(vulnerability_record)
        .collect()
}

fn advisory_record(node: &AdvisoryNode) -> Result<Record> {
    let (score, vector) = match &node.cvss {
        Some(cvss) => (cvss.score, cvss.vector_string.clone()),
        None => (None, None),
    };
    // GitHub reports "no score" as 0.0 without a vector
    let score = score.filter(|s| !(*s == 0.0 && vector.is_none()));

    Ok(Record::new()
        .with("ghsa_id", node.ghsa_id.as_str())
        .with("origin", node.origin.clone())
        .with("published_at", timestamp(node.published_at.as_deref())?)
        .with("description", node.description.clone())
        .with("severity", severity(&node.severity)?)
        .with("summary", node.summary.clone())
        .with("updated_at", timestamp(node.updated_at.as_deref())?)
        .with("classification", node.classification.clone())
        .with("cvss_score", score)
        .with("cvss_vector_string", vector))
}

fn vulnerability_record(node: &VulnerabilityNode) -> Result<Record> {
    Ok(Record::new()
        .with("ghsa_id", node.advisory.ghsa_id.as_str())
        .with("severity", severity(&node.severity)?)
        .with("package_name", node.package.name.clone())
        .with("package_ecosystem", node.package.ecosystem.clone())
        .with("vuln_version_range", node.vulnerable_version_range.clone())
        .with(
            "first_patched_version",
            node.first_patched_version.as_ref().map(|v| v.identifier.clone()),
        )
        .with("updated_at", timestamp(node.updated_at.as_deref())?))
}

fn severity(text: &Option<String>) -> Result<FieldValue> {
    Ok(text
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()?
        .into())
}

fn timestamp(text: Option<&str>) -> Result<FieldValue> {
    Ok(text.map(parse_timestamp).transpose()?.into())
}
