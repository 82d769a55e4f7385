//! NIST NVD CVE feed
//!
//! Offset-paged retrieval of `/rest/json/cves/2.0` into the `NIST_CVE` and
//! `NIST_CVSS` tables. The first run (or a run against an empty CVE table)
//! pulls the full catalogue; later runs only ask for CVEs modified since the
//! newest stored `last_modified_datetime`.

pub mod models;
pub mod parser;

pub use parser::{NvdParser, NvdRecords};

use super::{
    collapse_duplicates, ensure_table, load_staged, stage_pages, sync_table, FeedContext, RunSummary,
};
use crate::config::NvdConfig;
use crate::error::Result;
use crate::mapping::FieldMapping;
use crate::paging::{Endpoint, JsonOffsetInspector, Paging, RequestParams};
use crate::store::{TableSpec, TableStore};
use chrono::{DateTime, Utc};
use secfeed_common::FieldKind;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Query timestamp format for the `lastMod*Date` parameters
pub const NVD_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn cve_table() -> TableSpec {
    TableSpec::new(
        "NIST_CVE",
        FieldMapping::new(&[
            ("CVE_ID", "cve_id", FieldKind::Text),
            ("SRC_ID", "source_id", FieldKind::Text),
            ("PUBLSH_DATETIME", "published_datetime", FieldKind::Timestamp),
            ("LST_MOD_DATETIME", "last_modified_datetime", FieldKind::Timestamp),
            ("STATUS", "status", FieldKind::Text),
            ("DSCRPTN", "description", FieldKind::Text),
        ]),
        &["cve_id"],
    )
}

pub fn cvss_table() -> TableSpec {
    TableSpec::new(
        "NIST_CVSS",
        FieldMapping::new(&[
            ("CVE_ID", "cve_id", FieldKind::Text),
            ("VERSION", "version", FieldKind::Text),
            ("SRC_ID", "source", FieldKind::Text),
            ("TYPE", "type", FieldKind::Text),
            ("VCTR_STR", "vector_string", FieldKind::Text),
            ("ATTCK_VCTR", "attack_vector", FieldKind::Text),
            ("ATTCK_CMPLXTY", "attack_complexity", FieldKind::Text),
            ("CNFDNLTY_IMPCT", "confidentiality_impact", FieldKind::Text),
            ("INTGRTY_IMPCT", "integrity_impact", FieldKind::Text),
            ("AVLBLTY_IMPCT", "availability_impact", FieldKind::Text),
            ("BSE_SCR", "base_score", FieldKind::Float),
            ("BSE_SEV", "base_severity", FieldKind::Text),
            ("EXPLTBLTY_SCR", "exploitability_score", FieldKind::Float),
            ("IMPCT_SCR", "impact_score", FieldKind::Float),
        ]),
        &["cve_id", "version", "source", "type"],
    )
}

/// Which slice of the catalogue a run asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvdMode {
    Full,
    Incremental {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

impl NvdMode {
    /// Page prefix for a run on `date_tag` (`YYYY_MM_DD`)
    pub fn prefix(&self, date_tag: &str) -> String {
        match self {
            NvdMode::Full => format!("nist_cves_full_{date_tag}_"),
            NvdMode::Incremental { .. } => format!("nist_cves_inc_{date_tag}_"),
        }
    }

    pub fn params(&self) -> RequestParams {
        let mut params = RequestParams::new();
        if let NvdMode::Incremental { since, until } = self {
            params.insert(
                "lastModStartDate".to_string(),
                Value::String(since.format(NVD_DATE_FORMAT).to_string()),
            );
            params.insert(
                "lastModEndDate".to_string(),
                Value::String(until.format(NVD_DATE_FORMAT).to_string()),
            );
        }
        params
    }
}

pub fn endpoint(config: &NvdConfig) -> Endpoint {
    let headers = config
        .api_key
        .iter()
        .map(|key| ("apiKey".to_string(), key.clone()))
        .collect();
    Endpoint {
        url: config.url.clone(),
        headers,
        paging: Paging::Offset {
            offset_param: "startIndex".to_string(),
            page_size: config
                .results_per_page
                .map(|n| ("resultsPerPage".to_string(), u64::from(n))),
        },
    }
}

/// Pause between page requests, shorter when an API key is configured
pub fn request_delay(config: &NvdConfig) -> Duration {
    config.delay.resolve(config.api_key.is_some())
}

pub fn inspector() -> JsonOffsetInspector {
    JsonOffsetInspector::new("totalResults", "resultsPerPage")
}

/// Newest `last_modified_datetime` of the stored CVEs
pub async fn last_modified(store: &dyn TableStore, table: &TableSpec) -> Result<Option<DateTime<Utc>>> {
    Ok(store
        .read_all(table)
        .await?
        .iter()
        .filter_map(|r| r.get("last_modified_datetime").and_then(|v| v.as_timestamp()))
        .max())
}

/// Bring `NIST_CVE` and `NIST_CVSS` up to date
pub async fn run(ctx: &FeedContext) -> Result<RunSummary> {
    let archive = ctx.prepare_archive("nist_cve_db_update")?;
    let store = ctx.store.as_ref();
    let cves = cve_table();
    let cvss = cvss_table();

    let created_cve = ensure_table(store, &cves).await?;
    let created_cvss = ensure_table(store, &cvss).await?;
    let mode = match (created_cve || created_cvss, last_modified(store, &cves).await?) {
        (false, Some(since)) => NvdMode::Incremental {
            since,
            until: Utc::now(),
        },
        _ => NvdMode::Full,
    };
    info!(mode = ?mode, "Getting NIST NVD CVE data");

    let config = &ctx.config.nvd;
    let pages = ctx.page_store(&mode.prefix(&ctx.date_tag()), "json")?;
    let fetch = ctx
        .fetcher(request_delay(config))
        .fetch(&endpoint(config), &pages, &mode.params(), &inspector())
        .await?;

    let parser = NvdParser::new(config.primary_cvss_only);
    let staged = stage_pages(&pages, &[&cves, &cvss], |page| {
        let records = parser.parse_page(page)?;
        Ok(vec![records.cves, records.cvss])
    })
    .await?;

    let incoming_cves = collapse_duplicates(load_staged(&staged.tables[0], &cves)?, &cves);
    let incoming_cvss = collapse_duplicates(load_staged(&staged.tables[1], &cvss)?, &cvss);
    let tables = vec![
        sync_table(store, &cves, &incoming_cves).await?,
        sync_table(store, &cvss, &incoming_cvss).await?,
    ];

    ctx.finish(archive.as_deref(), &staged.files())?;
    Ok(RunSummary {
        feed: "nvd".to_string(),
        fetch,
        tables,
        archive,
    })
}
