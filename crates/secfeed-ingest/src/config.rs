//! Ingestion configuration
//!
//! Everything is read once from the environment (after `.env` is loaded by
//! the binary). Credentials live here and are passed down explicitly.

use crate::error::{IngestError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_NVD_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
pub const DEFAULT_GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
pub const DEFAULT_KEV_URL: &str =
    "https://www.cisa.gov/sites/default/files/csv/known_exploited_vulnerabilities.csv";

/// Inter-request delay that depends on whether a credential was supplied
///
/// Resolved once per session into a single `Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDelay {
    pub with_credential: Duration,
    pub without_credential: Duration,
}

impl RequestDelay {
    pub const NONE: RequestDelay = RequestDelay {
        with_credential: Duration::ZERO,
        without_credential: Duration::ZERO,
    };

    /// NVD publishes 50 requests / 30 s with a key and 5 / 30 s without
    pub fn nvd_default() -> Self {
        Self {
            with_credential: Duration::from_secs(3),
            without_credential: Duration::from_secs(6),
        }
    }

    pub fn resolve(&self, has_credential: bool) -> Duration {
        if has_credential {
            self.with_credential
        } else {
            self.without_credential
        }
    }
}

/// HTTP client behaviour shared by every feed
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n * retry_delay`
    pub retry_delay: Duration,
    pub proxy: Option<String>,
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            proxy: None,
            accept_invalid_certs: false,
            user_agent: format!("secfeed-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NvdConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Page-size hint; `None` lets the API choose
    pub results_per_page: Option<u32>,
    pub delay: RequestDelay,
    /// Keep only CVSS metrics of type `Primary`
    pub primary_cvss_only: bool,
}

impl Default for NvdConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NVD_URL.to_string(),
            api_key: None,
            results_per_page: None,
            delay: RequestDelay::nvd_default(),
            primary_cvss_only: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub graphql_url: String,
    pub token: Option<String>,
    pub page_size: u32,
    pub delay: RequestDelay,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            graphql_url: DEFAULT_GITHUB_GRAPHQL_URL.to_string(),
            token: None,
            page_size: 100,
            delay: RequestDelay::NONE,
        }
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory holding page files and partial CSVs of running sessions
    pub work_dir: PathBuf,
    /// Directory of the CSV table store
    pub store_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// Archive intermediate files at the end of a run
    pub archive: bool,
    /// Rotate an existing archive instead of refusing to run
    pub override_existing: bool,
    pub http: HttpConfig,
    pub nvd: NvdConfig,
    pub github: GithubConfig,
    pub kev_url: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./data/work"),
            store_dir: PathBuf::from("./data/store"),
            archive_dir: PathBuf::from("./data/archive"),
            archive: true,
            override_existing: false,
            http: HttpConfig::default(),
            nvd: NvdConfig::default(),
            github: GithubConfig::default(),
            kev_url: DEFAULT_KEV_URL.to_string(),
        }
    }
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    ///
    /// - `SECFEED_WORK_DIR`, `SECFEED_STORE_DIR`, `SECFEED_ARCHIVE_DIR`
    /// - `SECFEED_ARCHIVE` (true/false), `SECFEED_OVERRIDE` (true/false)
    /// - `SECFEED_HTTP_TIMEOUT_SECS`, `SECFEED_HTTP_MAX_ATTEMPTS`,
    ///   `SECFEED_HTTP_RETRY_DELAY_SECS`, `SECFEED_PROXY`, `SECFEED_INSECURE_TLS`
    /// - `NVD_API_KEY`, `SECFEED_NVD_URL`, `SECFEED_NVD_RESULTS_PER_PAGE`,
    ///   `SECFEED_NVD_DELAY_WITH_KEY_SECS`, `SECFEED_NVD_DELAY_WITHOUT_KEY_SECS`,
    ///   `SECFEED_NVD_PRIMARY_ONLY`
    /// - `GITHUB_TOKEN`, `SECFEED_GITHUB_URL`, `SECFEED_GITHUB_PAGE_SIZE`
    /// - `SECFEED_KEV_URL`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Lookup(&lookup);

        let http = HttpConfig {
            timeout: env.secs("SECFEED_HTTP_TIMEOUT_SECS", defaults.http.timeout)?,
            max_attempts: env.parse("SECFEED_HTTP_MAX_ATTEMPTS", defaults.http.max_attempts)?,
            retry_delay: env.secs("SECFEED_HTTP_RETRY_DELAY_SECS", defaults.http.retry_delay)?,
            proxy: env.text("SECFEED_PROXY"),
            accept_invalid_certs: env.parse("SECFEED_INSECURE_TLS", false)?,
            user_agent: defaults.http.user_agent,
        };

        let nvd = NvdConfig {
            url: env.text("SECFEED_NVD_URL").unwrap_or(defaults.nvd.url),
            api_key: env.text("NVD_API_KEY"),
            results_per_page: env
                .text("SECFEED_NVD_RESULTS_PER_PAGE")
                .map(|raw| parse_value("SECFEED_NVD_RESULTS_PER_PAGE", &raw))
                .transpose()?,
            delay: RequestDelay {
                with_credential: env.secs(
                    "SECFEED_NVD_DELAY_WITH_KEY_SECS",
                    defaults.nvd.delay.with_credential,
                )?,
                without_credential: env.secs(
                    "SECFEED_NVD_DELAY_WITHOUT_KEY_SECS",
                    defaults.nvd.delay.without_credential,
                )?,
            },
            primary_cvss_only: env.parse("SECFEED_NVD_PRIMARY_ONLY", true)?,
        };

        let github = GithubConfig {
            graphql_url: env.text("SECFEED_GITHUB_URL").unwrap_or(defaults.github.graphql_url),
            token: env.text("GITHUB_TOKEN"),
            page_size: env.parse("SECFEED_GITHUB_PAGE_SIZE", defaults.github.page_size)?,
            delay: defaults.github.delay,
        };

        let config = Self {
            work_dir: env.text("SECFEED_WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
            store_dir: env
                .text("SECFEED_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            archive_dir: env
                .text("SECFEED_ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
            archive: env.parse("SECFEED_ARCHIVE", defaults.archive)?,
            override_existing: env.parse("SECFEED_OVERRIDE", defaults.override_existing)?,
            http,
            nvd,
            github,
            kev_url: env.text("SECFEED_KEV_URL").unwrap_or(defaults.kev_url),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.http.max_attempts == 0 {
            return Err(IngestError::Config(
                "SECFEED_HTTP_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.http.timeout.is_zero() {
            return Err(IngestError::Config(
                "SECFEED_HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if let Some(per_page) = self.nvd.results_per_page {
            if per_page == 0 || per_page > 2000 {
                return Err(IngestError::Config(
                    "SECFEED_NVD_RESULTS_PER_PAGE must be between 1 and 2000".to_string(),
                ));
            }
        }
        if self.github.page_size == 0 || self.github.page_size > 100 {
            return Err(IngestError::Config(
                "SECFEED_GITHUB_PAGE_SIZE must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }

    /// The GitHub GraphQL API refuses anonymous requests
    pub fn require_github_token(&self) -> Result<&str> {
        self.github
            .token
            .as_deref()
            .ok_or_else(|| IngestError::Config("GITHUB_TOKEN is required for GitHub feeds".to_string()))
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.text(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.text(key) {
            Some(raw) => parse_value::<u64>(key, &raw).map(Duration::from_secs),
            None => Ok(default),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| IngestError::Config(format!("{key} has an invalid value: {raw:?}")))
}
