//! Default values for skyrun configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// API Defaults
// ============================================================================

/// Default Self Service endpoint.
pub const DEFAULT_SELFSERVICE_URL: &str = "https://selfservice-4.rightscale.com";

/// Default Cloud Management endpoint, used only to authenticate.
pub const DEFAULT_API_URL: &str = "https://us-4.rightscale.com";

/// Value of the `X-Api-Version` header sent to Self Service.
pub const DEFAULT_SELFSERVICE_API_VERSION: &str = "1.0";

/// Value of the `X-API-VERSION` header sent to Cloud Management.
pub const DEFAULT_CM_API_VERSION: &str = "1.5";

/// User agent for every outgoing request.
pub const DEFAULT_USER_AGENT: &str = concat!("skyrun/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Test Run Defaults
// ============================================================================

/// Seconds between two pumps of a test suite.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Glob used by `skyrun test` when no pattern is given.
pub const DEFAULT_TEST_PATTERN: &str = "*.cat.rb";

// ============================================================================
// Config Files
// ============================================================================

/// Project-local config file name.
pub const DEFAULT_CONFIG_FILE: &str = "skyrun.toml";

/// Directory under the user config dir.
pub const DEFAULT_CONFIG_DIR: &str = "skyrun";

/// Prefix of the file written by `template preprocess` when no output is given.
pub const DEFAULT_PREPROCESS_PREFIX: &str = "processed-";
