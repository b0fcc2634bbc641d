pub const DEFAULT_DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

// Environment variable names
pub const ENV_DRIVE_API_KEY: &str = "GOOGLE_DRIVE_API_KEY";
pub const ENV_DRIVE_BASE_URL: &str = "GOOGLE_DRIVE_BASE_URL";
pub const ENV_RECIPIENTS_FOLDER_ID: &str = "CAMPAIGN_RECIPIENTS_FOLDER_ID";
pub const ENV_DRIVE_TIMEOUT_SECS: &str = "GOOGLE_DRIVE_TIMEOUT_SECS";
pub const ENV_METRICS_SERVICE_URL: &str = "METRICS_SERVICE_URL";
pub const ENV_SQLITE_PATH: &str = "PORTAL_SQLITE_PATH";
pub const ENV_SERVER_PORT: &str = "PORTAL_PORT";
pub const ENV_METRICS_PORT: &str = "PORTAL_METRICS_PORT";

// Drive mime types
pub const MIME_GOOGLE_SPREADSHEET: &str = "application/vnd.google-apps.spreadsheet";
pub const MIME_CSV: &str = "text/csv";

/// How far back the first import of a property reaches
pub const BACKFILL_YEARS: i32 = 5;

/// Extra history pulled in front of a requested window for year-over-year views
pub const COMPARISON_YEARS: i32 = 1;
