// GitHub GraphQL advisory payloads

use serde::Deserialize;
use serde_json::Value;

/// GraphQL response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlPage<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

// ============================================================================
// securityAdvisories
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoriesData {
    pub security_advisories: Connection<AdvisoryNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryNode {
    pub ghsa_id: String,
    pub origin: Option<String>,
    pub published_at: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub updated_at: Option<String>,
    pub classification: Option<String>,
    pub cvss: Option<Cvss>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cvss {
    pub score: Option<f64>,
    pub vector_string: Option<String>,
}

/// Alias of an advisory, e.g. `CVE-2021-44228`
#[derive(Debug, Clone, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub value: String,
}

// ============================================================================
// securityVulnerabilities
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilitiesData {
    pub security_vulnerabilities: Connection<VulnerabilityNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityNode {
    pub advisory: AdvisoryRef,
    pub first_patched_version: Option<PatchedVersion>,
    pub package: Package,
    pub severity: Option<String>,
    pub updated_at: Option<String>,
    pub vulnerable_version_range: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryRef {
    pub ghsa_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchedVersion {
    pub identifier: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Package {
    pub name: Option<String>,
    pub ecosystem: Option<String>,
}

text_enum! {
    Severity {
        Low => "LOW",
        Moderate => "MODERATE",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}
