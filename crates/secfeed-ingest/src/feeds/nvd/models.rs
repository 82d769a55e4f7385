// NVD CVE API 2.0 payloads and enumerations

use serde::Deserialize;

// ============================================================================
// Response pages
// ============================================================================

/// One page of `GET /rest/json/cves/2.0`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvePage {
    pub results_per_page: u64,
    pub start_index: u64,
    pub total_results: u64,
    #[serde(default)]
    pub vulnerabilities: Vec<VulnerabilityItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VulnerabilityItem {
    pub cve: Cve,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cve {
    pub id: String,
    pub source_identifier: Option<String>,
    pub published: Option<String>,
    pub last_modified: Option<String>,
    pub vuln_status: Option<String>,
    #[serde(default)]
    pub descriptions: Vec<LangString>,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LangString {
    pub lang: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metrics {
    #[serde(rename = "cvssMetricV2", default)]
    pub v2: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV30", default)]
    pub v30: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV31", default)]
    pub v31: Vec<CvssMetric>,
}

impl Metrics {
    pub fn all(&self) -> impl Iterator<Item = &CvssMetric> {
        self.v2.iter().chain(self.v30.iter()).chain(self.v31.iter())
    }
}

/// A metric record. Version 2 keeps severity and sub-scores on the record,
/// versions 3.x keep severity inside `cvssData`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvssMetric {
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub cvss_data: CvssData,
    pub base_severity: Option<String>,
    pub exploitability_score: Option<f64>,
    pub impact_score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvssData {
    pub version: String,
    pub vector_string: Option<String>,
    // CVSS v2 names
    pub access_vector: Option<String>,
    pub access_complexity: Option<String>,
    // CVSS v3 names
    pub attack_vector: Option<String>,
    pub attack_complexity: Option<String>,
    pub confidentiality_impact: Option<String>,
    pub integrity_impact: Option<String>,
    pub availability_impact: Option<String>,
    pub base_score: Option<f64>,
    pub base_severity: Option<String>,
}

impl CvssData {
    pub fn is_v2(&self) -> bool {
        self.version == "2.0"
    }
}

// ============================================================================
// Enumerations
// ============================================================================

text_enum! {
    /// Whether a metric comes from the primary scorer or a secondary one
    RecordType {
        Primary => "Primary",
        Secondary => "Secondary",
    }
}

text_enum! {
    AttackVector {
        Network => "NETWORK",
        AdjacentNetwork => "ADJACENT_NETWORK",
        Local => "LOCAL",
        Physical => "PHYSICAL",
    }
}

text_enum! {
    AttackComplexity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
    }
}

text_enum! {
    /// v2 uses NONE/PARTIAL/COMPLETE, v3 NONE/LOW/HIGH
    Impact {
        None => "NONE",
        Low => "LOW",
        Partial => "PARTIAL",
        High => "HIGH",
        Complete => "COMPLETE",
    }
}

text_enum! {
    BaseSeverity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}
