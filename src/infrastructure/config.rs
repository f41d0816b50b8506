use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const CONFIG_FILE: &str = "config/analysis";
const ENV_PREFIX: &str = "RIG_ANALYSIS";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub backend: BackendSettings,
    pub analysis: AnalysisSettings,
    pub export: ExportSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub endpoints: EndpointTemplates,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 10,
            endpoints: EndpointTemplates::default(),
        }
    }
}

/// Backend routes with `${name}` placeholders.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointTemplates {
    pub test_sensors: String,
    pub aggregate: String,
    pub raw: String,
    pub crop: String,
    pub segments: String,
    pub test_segments: String,
    pub segment: String,
    pub export: String,
    pub export_status: String,
    pub export_download: String,
}

impl Default for EndpointTemplates {
    fn default() -> Self {
        Self {
            test_sensors: "/api/test-relations/${test_id}".to_string(),
            aggregate: "/api/measurements/avg/${sensor_id}".to_string(),
            raw: "/api/measurements/raw/${sensor_id}".to_string(),
            crop: "/api/tests/${test_id}/crop".to_string(),
            segments: "/api/test-segments".to_string(),
            test_segments: "/api/test-segments/test/${test_id}".to_string(),
            segment: "/api/test-segments/${segment_id}".to_string(),
            export: "/api/tests/${test_id}/export".to_string(),
            export_status: "/api/exports/${job_id}/status".to_string(),
            export_download: "/api/exports/${job_id}/download".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisSettings {
    pub aggregate_limit: usize,
    pub raw_limit: usize,
    pub raw_last_minutes: Option<u32>,
    pub select_all_on_open: bool,
    pub min_subplot_height: u32,
    pub viewport_chrome: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            aggregate_limit: 50_000,
            raw_limit: 50_000,
            raw_last_minutes: Some(3),
            select_all_on_open: true,
            min_subplot_height: 100,
            viewport_chrome: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportSettings {
    pub poll_interval_ms: u64,
    pub clear_delay_ms: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            clear_delay_ms: 3000,
        }
    }
}

impl ExportSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn clear_delay(&self) -> Duration {
        Duration::from_millis(self.clear_delay_ms)
    }
}

/// Optional `config/analysis.*` file, overridden by `RIG_ANALYSIS__SECTION__KEY` variables.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace `${name}` placeholders in a path template with URL-encoded values
pub fn prepare_path(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, &urlencoding::encode(value));
    }
    result
}
