//! Shared helpers for secfeed-ingest integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use secfeed_ingest::config::{HttpConfig, IngestConfig, RequestDelay};
use secfeed_ingest::transport::{HttpTransport, Transport};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,secfeed_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Two attempts per request, no backoff
pub fn http_config() -> HttpConfig {
    HttpConfig {
        max_attempts: 2,
        retry_delay: Duration::ZERO,
        timeout: Duration::from_secs(10),
        ..HttpConfig::default()
    }
}

pub fn transport() -> Arc<dyn Transport> {
    Arc::new(HttpTransport::new(&http_config()).unwrap())
}

/// Configuration rooted in `dir` with every upstream pointed at `server`
pub fn config(dir: &Path, server: &str) -> IngestConfig {
    let mut config = IngestConfig {
        work_dir: dir.join("work"),
        store_dir: dir.join("store"),
        archive_dir: dir.join("archive"),
        http: http_config(),
        kev_url: format!("{server}/kev.csv"),
        ..IngestConfig::default()
    };
    config.nvd.url = format!("{server}/rest/json/cves/2.0");
    config.nvd.delay = RequestDelay::NONE;
    config.github.graphql_url = format!("{server}/graphql");
    config.github.token = Some("ghp_test".to_string());
    config
}

/// NVD page carrying `ids` as minimal CVE entries
pub fn nvd_page(total: u64, per_page: u64, start: u64, ids: &[&str]) -> Value {
    let vulnerabilities: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "cve": {
                    "id": id,
                    "sourceIdentifier": "cve@mitre.org",
                    "published": "2024-01-02T10:15:00.000",
                    "lastModified": "2024-01-03T08:00:00.000",
                    "vulnStatus": "Analyzed",
                    "descriptions": [{"lang": "en", "value": format!("Description of {id}")}],
                    "metrics": {
                        "cvssMetricV31": [{
                            "source": "nvd@nist.gov",
                            "type": "Primary",
                            "cvssData": {
                                "version": "3.1",
                                "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H",
                                "attackVector": "NETWORK",
                                "attackComplexity": "LOW",
                                "confidentialityImpact": "HIGH",
                                "integrityImpact": "HIGH",
                                "availabilityImpact": "HIGH",
                                "baseScore": 9.8,
                                "baseSeverity": "CRITICAL"
                            },
                            "exploitabilityScore": 3.9,
                            "impactScore": 5.9
                        }]
                    }
                }
            })
        })
        .collect();

    json!({
        "resultsPerPage": per_page,
        "startIndex": start,
        "totalResults": total,
        "format": "NVD_CVE",
        "version": "2.0",
        "timestamp": "2024-02-05T12:00:00.000",
        "vulnerabilities": vulnerabilities,
    })
}
