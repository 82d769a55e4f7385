//! CISA Known Exploited Vulnerabilities catalogue
//!
//! A single CSV download, staged and promoted like a one-page session so a
//! rerun on the same day reuses it, then reconciled into `CISA_KEV`.

use super::{collapse_duplicates, ensure_table, sync_table, FeedContext, RunSummary};
use crate::csv_io::read_records;
use crate::error::Result;
use crate::mapping::{FieldMapping, Naming};
use crate::paging::page_store::remove_if_present;
use crate::paging::{FetchOutcome, PageStore};
use crate::store::TableSpec;
use crate::transport::PageRequest;
use secfeed_common::{FieldKind, FieldValue, Record};
use tracing::{info, warn};

text_enum! {
    RansomwareUse {
        Known => "Known",
        Unknown => "Unknown",
    }
}

/// Column names of the published CSV
pub fn upstream_mapping() -> FieldMapping {
    FieldMapping::new(&[
        ("cveID", "cve_id", FieldKind::Text),
        ("vendorProject", "vendor_project", FieldKind::Text),
        ("product", "product", FieldKind::Text),
        ("vulnerabilityName", "vulnerability_name", FieldKind::Text),
        ("dateAdded", "date_added", FieldKind::Date),
        ("shortDescription", "short_description", FieldKind::Text),
        ("requiredAction", "required_action", FieldKind::Text),
        ("dueDate", "due_date", FieldKind::Date),
        ("knownRansomwareCampaignUse", "known_ransomware_campaign_use", FieldKind::Text),
        ("notes", "notes", FieldKind::Text),
    ])
}

pub fn kev_table() -> TableSpec {
    TableSpec::new(
        "CISA_KEV",
        FieldMapping::new(&[
            ("CVE_ID", "cve_id", FieldKind::Text),
            ("VNDR_PRJCT", "vendor_project", FieldKind::Text),
            ("PRDCT", "product", FieldKind::Text),
            ("VLN_NAME", "vulnerability_name", FieldKind::Text),
            ("CISA_ADDED_DATE", "date_added", FieldKind::Date),
            ("SHRT_DSC", "short_description", FieldKind::Text),
            ("REQRD_ACTN", "required_action", FieldKind::Text),
            ("DUE_DATE", "due_date", FieldKind::Date),
            ("KNWN_RNSMWR_CMPGN", "known_ransomware_campaign_use", FieldKind::Text),
            ("NOTES", "notes", FieldKind::Text),
        ]),
        &["cve_id"],
    )
}

/// Parse the published CSV; columns it adds later are ignored
pub fn parse_catalog(contents: &[u8]) -> Result<Vec<Record>> {
    let records = read_records(contents, &upstream_mapping(), Naming::External)?;
    for record in &records {
        if let Some(FieldValue::Text(text)) = record.get("known_ransomware_campaign_use") {
            text.parse::<RansomwareUse>()?;
        }
    }
    Ok(records)
}

async fn download(ctx: &FeedContext, pages: &PageStore) -> Result<bool> {
    pages.ensure_dir().await?;
    pages.discard_staging().await?;
    if pages.exists(0).await? {
        info!(path = %pages.page_path(0).display(), "Reusing downloaded catalogue");
        return Ok(false);
    }

    let staging = pages.staging_path(0);
    let result: Result<bool> = async {
        let bytes = ctx
            .transport
            .download(&PageRequest::get(&ctx.config.kev_url), &staging)
            .await?;
        parse_catalog(&tokio::fs::read(&staging).await?)?;
        pages.promote(&staging, 0).await?;
        info!(bytes, "Downloaded KEV catalogue");
        Ok(true)
    }
    .await;

    if let Err(e) = &result {
        warn!(error = %e, "Discarding staged catalogue");
        remove_if_present(&staging).await?;
    }
    result
}

/// Sync `CISA_KEV` with the published catalogue
pub async fn run(ctx: &FeedContext) -> Result<RunSummary> {
    let archive = ctx.prepare_archive("cisa_kev_db")?;
    let store = ctx.store.as_ref();
    let table = kev_table();
    ensure_table(store, &table).await?;

    info!("Collecting KEV data from CISA");
    let pages = ctx.page_store(&format!("cisa_kev_{}_", ctx.date_tag()), "csv")?;
    let written = download(ctx, &pages).await?;
    let fetch = FetchOutcome {
        pages_written: u64::from(written),
        pages_resumed: u64::from(!written),
        last_index: Some(0),
        ..FetchOutcome::default()
    };

    let incoming = collapse_duplicates(parse_catalog(&pages.read(0).await?)?, &table);
    let report = sync_table(store, &table, &incoming).await?;

    ctx.finish(archive.as_deref(), &[pages.page_path(0)])?;
    Ok(RunSummary {
        feed: "kev".to_string(),
        fetch,
        tables: vec![report],
        archive,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secfeed_common::types::parse_date;

    const CATALOG: &str = "cveID,vendorProject,product,vulnerabilityName,dateAdded,shortDescription,requiredAction,dueDate,knownRansomwareCampaignUse,notes,cwes\n\
CVE-2021-44228,Apache,Log4j2,Apache Log4j2 Remote Code Execution Vulnerability,2021-12-10,\"Apache Log4j2 contains a vulnerability, allowing code execution.\",Apply updates per vendor instructions.,2021-12-24,Known,https://nvd.nist.gov/vuln/detail/CVE-2021-44228,CWE-20\n\
CVE-2023-0001,Example,Widget,Widget Flaw,2024-01-05,Widget flaw.,Apply mitigations.,2024-01-26,Unknown,,\n";

    #[test]
    fn test_parse_catalog() {
        let records = parse_catalog(CATALOG.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let log4j = &records[0];
        assert_eq!(log4j.get("cve_id"), Some(&FieldValue::from("CVE-2021-44228")));
        assert_eq!(
            log4j.get("date_added"),
            Some(&FieldValue::from(parse_date("2021-12-10").unwrap()))
        );
        assert_eq!(
            log4j.get("short_description"),
            Some(&FieldValue::from("Apache Log4j2 contains a vulnerability, allowing code execution."))
        );
        assert!(!log4j.contains("cwes"));
        assert_eq!(records[1].get("notes"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_unknown_ransomware_value_is_rejected() {
        let catalog = CATALOG.replace(",Known,", ",Maybe,");
        assert!(parse_catalog(catalog.as_bytes()).is_err());
    }

    #[test]
    fn test_upstream_and_table_mappings_agree() {
        let upstream = upstream_mapping();
        let table = kev_table();
        assert_eq!(upstream.columns(Naming::Internal), table.mapping.columns(Naming::Internal));
    }
}
