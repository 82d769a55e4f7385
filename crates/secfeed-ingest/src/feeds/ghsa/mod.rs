//! GitHub security advisories feed
//!
//! Two cursor-paged GraphQL pulls:
//!
//! - `securityAdvisories` fills `GHSA_ENTRY` and the identifier table
//!   `GHSA_VULN_ENTRY` (CVE and other aliases, GHSA self-references left out)
//! - `securityVulnerabilities` fills `GHSA_VULN_ENTRY_DTLS`, one row per
//!   affected package range. New rows for advisories that are not stored yet
//!   are dropped, so run the advisory job first.

pub mod models;
pub mod parser;

pub use parser::{parse_advisories, parse_vulnerabilities, reject_graphql_errors, AdvisoryRecords};

use super::{
    apply, collapse_duplicates, ensure_table, load_staged, reconcile_table, stage_pages, sync_table,
    FeedContext, RunSummary,
};
use crate::config::GithubConfig;
use crate::error::Result;
use crate::mapping::FieldMapping;
use crate::paging::{Endpoint, JsonCursorInspector, Paging, RequestParams};
use crate::store::{TableSpec, TableStore};
use chrono::{DateTime, SecondsFormat, Utc};
use secfeed_common::{FieldKind, FieldValue};
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

pub const GHSA_GQL: &str = r#"query($first: Int, $after: String, $updatedSince: DateTime){
  securityAdvisories(first: $first, after: $after, updatedSince: $updatedSince){
    nodes {
      ghsaId
      origin
      publishedAt
      description
      severity
      summary
      updatedAt
      classification
      cvss {
        score
        vectorString
      }
      identifiers{
        type
        value
      }
    }
    pageInfo {
      endCursor
      hasNextPage
    }
    totalCount
  }
}"#;

pub const GH_VULN_GQL: &str = r#"query($first: Int, $after: String){
  securityVulnerabilities(first: $first, after: $after) {
    pageInfo {
      endCursor
      hasNextPage
    }
    totalCount
    nodes {
      advisory {
        ghsaId
      }
      firstPatchedVersion {
        identifier
      }
      package {
        name
        ecosystem
      }
      severity
      updatedAt
      vulnerableVersionRange
    }
  }
}"#;

pub fn advisory_table() -> TableSpec {
    TableSpec::new(
        "GHSA_ENTRY",
        FieldMapping::new(&[
            ("ID", "ghsa_id", FieldKind::Text),
            ("ORIGN", "origin", FieldKind::Text),
            ("PBLSHD_TMSTMP", "published_at", FieldKind::Timestamp),
            ("DESC", "description", FieldKind::Text),
            ("SEV", "severity", FieldKind::Text),
            ("SMMRY", "summary", FieldKind::Text),
            ("UPDT_TMSTMP", "updated_at", FieldKind::Timestamp),
            ("CLSSFCTN", "classification", FieldKind::Text),
            ("CVSS_SCR", "cvss_score", FieldKind::Float),
            ("CVSS_VSTR", "cvss_vector_string", FieldKind::Text),
        ]),
        &["ghsa_id"],
    )
}

pub fn identifier_table() -> TableSpec {
    TableSpec::new(
        "GHSA_VULN_ENTRY",
        FieldMapping::new(&[
            ("VULN_ID", "identifier", FieldKind::Text),
            ("GHSA_ID", "ghsa_id", FieldKind::Text),
            ("ID_TYP", "identifier_type", FieldKind::Text),
        ]),
        &["identifier", "ghsa_id"],
    )
}

pub fn details_table() -> TableSpec {
    TableSpec::new(
        "GHSA_VULN_ENTRY_DTLS",
        FieldMapping::new(&[
            ("GHSA_ID", "ghsa_id", FieldKind::Text),
            ("SEV", "severity", FieldKind::Text),
            ("PCKG_NM", "package_name", FieldKind::Text),
            ("PCKG_ECOSYSTM", "package_ecosystem", FieldKind::Text),
            ("VLN_V_RNG", "vuln_version_range", FieldKind::Text),
            ("FRST_PTCH_V", "first_patched_version", FieldKind::Text),
            ("UPDTD_AT", "updated_at", FieldKind::Timestamp),
        ]),
        &["ghsa_id", "package_name", "package_ecosystem", "vuln_version_range"],
    )
}

pub fn endpoint(config: &GithubConfig, token: &str, query: &str) -> Endpoint {
    Endpoint {
        url: config.graphql_url.clone(),
        headers: vec![("Authorization".to_string(), format!("bearer {token}"))],
        paging: Paging::Cursor {
            query: query.to_string(),
            cursor_variable: "after".to_string(),
            page_size: Some(("first".to_string(), u64::from(config.page_size))),
        },
    }
}

/// Newest `updated_at` of the stored advisories
pub async fn last_updated(store: &dyn TableStore, table: &TableSpec) -> Result<Option<DateTime<Utc>>> {
    Ok(store
        .read_all(table)
        .await?
        .iter()
        .filter_map(|r| r.get("updated_at").and_then(|v| v.as_timestamp()))
        .max())
}

/// Sync `GHSA_ENTRY` and `GHSA_VULN_ENTRY`
///
/// Unless `full` is set, a store that already holds advisories is only
/// asked for advisories updated since the newest stored one.
pub async fn run_advisories(ctx: &FeedContext, full: bool) -> Result<RunSummary> {
    let token = ctx.config.require_github_token()?;
    let archive = ctx.prepare_archive("ghsa_db_update")?;
    let store = ctx.store.as_ref();
    let advisories = advisory_table();
    let identifiers = identifier_table();

    ensure_table(store, &advisories).await?;
    ensure_table(store, &identifiers).await?;

    let since = if full { None } else { last_updated(store, &advisories).await? };
    let mut params = RequestParams::new();
    let prefix = match since {
        Some(since) => {
            params.insert(
                "updatedSince".to_string(),
                Value::String(since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
            format!("ghsa_update_data_{}_", ctx.date_tag())
        },
        None => format!("ghsa_data_{}_", ctx.date_tag()),
    };
    info!(since = ?since, "Getting GitHub security advisories");

    let config = &ctx.config.github;
    let pages = ctx.page_store(&prefix, "json")?;
    let fetch = ctx
        .fetcher(config.delay.resolve(true))
        .with_integrity_check(reject_graphql_errors)
        .fetch(
            &endpoint(config, token, GHSA_GQL),
            &pages,
            &params,
            &JsonCursorInspector::for_connection("securityAdvisories"),
        )
        .await?;

    let staged = stage_pages(&pages, &[&advisories, &identifiers], |page| {
        let records = parse_advisories(page)?;
        Ok(vec![records.advisories, records.identifiers])
    })
    .await?;

    let incoming_advisories = collapse_duplicates(load_staged(&staged.tables[0], &advisories)?, &advisories);
    let incoming_identifiers = collapse_duplicates(load_staged(&staged.tables[1], &identifiers)?, &identifiers);
    let tables = vec![
        sync_table(store, &advisories, &incoming_advisories).await?,
        sync_table(store, &identifiers, &incoming_identifiers).await?,
    ];

    ctx.finish(archive.as_deref(), &staged.files())?;
    Ok(RunSummary {
        feed: "ghsa".to_string(),
        fetch,
        tables,
        archive,
    })
}

/// Sync `GHSA_VULN_ENTRY_DTLS`
pub async fn run_vulnerabilities(ctx: &FeedContext) -> Result<RunSummary> {
    let token = ctx.config.require_github_token()?;
    let archive = ctx.prepare_archive("ghsa_db_vuln_dtls_update")?;
    let store = ctx.store.as_ref();
    let advisories = advisory_table();
    let details = details_table();

    ensure_table(store, &details).await?;
    info!("Getting GitHub security vulnerability details");

    let config = &ctx.config.github;
    let pages = ctx.page_store(&format!("ghsa_vuln_data_{}_", ctx.date_tag()), "json")?;
    let fetch = ctx
        .fetcher(config.delay.resolve(true))
        .with_integrity_check(reject_graphql_errors)
        .fetch(
            &endpoint(config, token, GH_VULN_GQL),
            &pages,
            &RequestParams::new(),
            &JsonCursorInspector::for_connection("securityVulnerabilities"),
        )
        .await?;

    let staged = stage_pages(&pages, &[&details], |page| Ok(vec![parse_vulnerabilities(page)?])).await?;
    let incoming = collapse_duplicates(load_staged(&staged.tables[0], &details)?, &details);

    let known: HashSet<FieldValue> = if store.table_exists(&advisories).await? {
        store
            .read_all(&advisories)
            .await?
            .into_iter()
            .filter_map(|mut r| r.remove("ghsa_id"))
            .collect()
    } else {
        HashSet::new()
    };

    let mut result = reconcile_table(store, &details, &incoming).await?;
    let before = result.new.len();
    result
        .new
        .retain(|r| r.get("ghsa_id").is_some_and(|id| known.contains(id)));
    let dropped = before - result.new.len();
    if dropped > 0 {
        info!(dropped, "Dropped details of advisories that are not stored");
    }

    let mut report = apply(store, &details, incoming.len(), result).await?;
    report.unchanged = report.unchanged.saturating_sub(dropped);
    report.dropped = dropped;

    ctx.finish(archive.as_deref(), &staged.files())?;
    Ok(RunSummary {
        feed: "ghsa-vulns".to_string(),
        fetch,
        tables: vec![report],
        archive,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uses_bearer_token_and_cursor_variables() {
        let endpoint = endpoint(&GithubConfig::default(), "ghp_token", GHSA_GQL);
        assert_eq!(
            endpoint.headers,
            vec![("Authorization".to_string(), "bearer ghp_token".to_string())]
        );
        match endpoint.paging {
            Paging::Cursor {
                cursor_variable,
                page_size,
                ..
            } => {
                assert_eq!(cursor_variable, "after");
                assert_eq!(page_size, Some(("first".to_string(), 100)));
            },
            other => panic!("unexpected paging {other:?}"),
        }
    }

    #[test]
    fn test_table_keys_are_mapped_fields() {
        for table in [advisory_table(), identifier_table(), details_table()] {
            for key in &table.key_fields {
                assert!(table.mapping.external_name(key).is_some(), "{key} unmapped");
            }
        }
    }
}
