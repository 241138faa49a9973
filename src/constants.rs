/// Defaults and well-known names shared across the codebase

// Upstream source
pub const DEFAULT_API_BASE_URL: &str = "https://api.covidtracking.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 32;
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// Local storage
pub const DEFAULT_DB_PATH: &str = "covid_data.db";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_CONFIG_FILE: &str = "epi_ingest.toml";

// Environment overrides
pub const ENV_CONFIG_FILE: &str = "EPI_CONFIG";
pub const ENV_API_URL: &str = "EPI_API_URL";
pub const ENV_DB_PATH: &str = "EPI_DB_PATH";
pub const ENV_TIMEOUT_SECS: &str = "EPI_TIMEOUT_SECS";
pub const ENV_LOG_DIR: &str = "EPI_LOG_DIR";
pub const ENV_METRICS_PORT: &str = "EPI_METRICS_PORT";

// The whole-country series is stored as a pseudo-region
pub const NATIONAL_REGION_CODE: &str = "US";
pub const NATIONAL_REGION_NAME: &str = "United States";

// Region codes are fixed-length
pub const REGION_CODE_LEN: usize = 2;
