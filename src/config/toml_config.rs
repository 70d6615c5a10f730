use crate::adapters::amqp::DEFAULT_QUEUE;
use crate::core::processor::DEFAULT_MAX_DISTANCE_KM;
use crate::core::scheduler::parse_daily_time;
use crate::utils::error::{BloodSearchError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_required_field, validate_resolved,
    validate_url, validate_url_scheme, Validate,
};
use chrono::NaiveTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    pub notification: NotificationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_url")]
    pub url: String,
    #[serde(default = "default_queue_name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_endpoint")]
    pub endpoint: String,
    pub api_key: String,
    #[serde(default = "default_true")]
    pub cache_branches: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_max_distance_km")]
    pub max_distance_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_notification_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_body")]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_queue_url() -> String {
    "amqp://localhost:5672".to_string()
}
fn default_queue_name() -> String {
    DEFAULT_QUEUE.to_string()
}
fn default_geocoder_endpoint() -> String {
    "https://api.opencagedata.com/geocode/v1/json".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_distance_km() -> f64 {
    DEFAULT_MAX_DISTANCE_KM
}
fn default_notification_endpoint() -> String {
    "https://api.sendgrid.com/v3/mail/send".to_string()
}
fn default_from_name() -> String {
    "Health Organization".to_string()
}
fn default_subject() -> String {
    "Blood Request".to_string()
}
fn default_body() -> String {
    "The requested blood type found".to_string()
}
fn default_daily_at() -> String {
    "01:00".to_string()
}
fn default_call_timeout_seconds() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
            name: default_queue_name(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_distance_km: default_max_distance_km(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            call_timeout_seconds: default_call_timeout_seconds(),
        }
    }
}

impl ServiceConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| BloodSearchError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${OPENCAGE_API_KEY})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| BloodSearchError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.call_timeout_seconds)
    }

    pub fn daily_at(&self) -> Result<NaiveTime> {
        parse_daily_time(&self.schedule.daily_at)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("database.url", &self.database.url)?;
        validate_positive_number("database.max_connections", self.database.max_connections as usize, 1)?;

        validate_url_scheme("queue.url", &self.queue.url, &["amqp", "amqps"])?;
        validate_non_empty_string("queue.name", &self.queue.name)?;

        validate_url("geocoder.endpoint", &self.geocoder.endpoint)?;
        validate_non_empty_string("geocoder.api_key", &self.geocoder.api_key)?;
        validate_resolved("geocoder.api_key", &self.geocoder.api_key)?;

        validate_range("matching.max_distance_km", self.matching.max_distance_km, f64::MIN_POSITIVE, 20_038.0)?;

        if self.notification.enabled {
            validate_url("notification.endpoint", &self.notification.endpoint)?;
            let api_key = validate_required_field("notification.api_key", &self.notification.api_key)?;
            validate_resolved("notification.api_key", api_key)?;
            let from_email = validate_required_field("notification.from_email", &self.notification.from_email)?;
            validate_non_empty_string("notification.from_email", from_email)?;
        }

        self.daily_at()?;
        validate_range("runtime.call_timeout_seconds", self.runtime.call_timeout_seconds, 1, 600)?;

        Ok(())
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
