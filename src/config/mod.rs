use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Object store bucket holding the daily export archives
    pub s3_bucket: String,

    /// Object store endpoint URL (S3-compatible)
    pub s3_endpoint: String,

    /// Object store access key ID
    pub s3_access_key: String,

    /// Object store secret access key
    pub s3_secret_key: String,

    /// Key prefix listed for today's archives
    #[serde(default = "default_s3_prefix")]
    pub s3_prefix: String,

    /// Base URL prepended to representative-image paths from the export
    pub image_base_url: String,

    /// AI provider base URL
    #[serde(default = "default_gemini_api_url")]
    pub gemini_api_url: String,

    /// AI provider API key
    pub gemini_api_key: String,

    /// AI provider model name
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Callback endpoint receiving per-batch inspection results
    pub callback_url: String,

    /// Monitoring endpoint receiving count/liveness payloads
    pub monitoring_url: String,

    /// Toggle for the monitoring/liveness posts
    #[serde(default = "default_monitoring_enabled")]
    pub monitoring_enabled: bool,

    /// Requests claimed per processing tick, clamped to (0, 1000]
    #[serde(default = "default_batch_size")]
    pub batch_size_per_tick: i64,

    /// Inspection attempts before a request fails terminally
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Days a finished batch job is kept before garbage collection
    #[serde(default = "default_retention_days")]
    pub retention_days: i32,

    /// Local directory for archive scratch space
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_prefix() -> String {
    "batch/".to_string()
}

fn default_gemini_api_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_monitoring_enabled() -> bool {
    true
}

fn default_batch_size() -> i64 {
    100
}

fn default_max_retries() -> i32 {
    3
}

fn default_retention_days() -> i32 {
    3
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
