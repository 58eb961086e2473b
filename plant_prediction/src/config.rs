use crate::artifact::{ArtifactSource, GoogleDriveSource, HttpSource, MissingSource, Sha256Verified};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default)]
    pub google_drive_id: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_num_classes() -> usize {
    30
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes == 0 {
            return Err("model.num_classes must be greater than zero".to_string());
        }
        if self.num_instances == 0 {
            return Err("model.num_instances must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Where to fetch the artifact from when it is not on disk yet.
    /// `download_url` wins over `google_drive_id`.
    pub fn artifact_source(&self) -> Box<dyn ArtifactSource> {
        let source: Box<dyn ArtifactSource> = match (&self.download_url, &self.google_drive_id) {
            (Some(url), _) => Box::new(HttpSource::new(url.clone())),
            (None, Some(file_id)) => Box::new(GoogleDriveSource::new(file_id.clone())),
            (None, None) => return Box::new(MissingSource::new(self.get_path())),
        };

        match &self.sha256 {
            Some(expected) => Box::new(Sha256Verified::new(source, expected.clone())),
            None => source,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LabelsConfig {
    #[serde(default)]
    pub labels_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.model.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(yaml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
log_level: "info"
server:
  host: "127.0.0.1"
  port: 3000
model:
  model_dir: "./models"
  onnx_file: "plant.onnx"
"#;

    #[test]
    fn test_defaults_are_applied() {
        let config = parse(MINIMAL);

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.server.get_address(), "127.0.0.1:3000");
        assert_eq!(config.server.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.model.num_classes, 30);
        assert!(config.model.num_instances >= 1);
        assert!(config.labels.labels_file.is_none());
        assert_eq!(config.model.get_path(), PathBuf::from("./models/plant.onnx"));
    }

    #[test]
    fn test_download_url_takes_precedence() {
        let yaml = format!(
            "{}  google_drive_id: \"abc\"\n  download_url: \"https://example.com/plant.onnx\"\n",
            MINIMAL
        );
        let config = parse(&yaml);

        let source = config.model.artifact_source();
        assert_eq!(source.describe(), "https://example.com/plant.onnx");
    }

    #[test]
    fn test_google_drive_source_from_id() {
        let yaml = format!("{}  google_drive_id: \"abc\"\n", MINIMAL);
        let config = parse(&yaml);

        let source = config.model.artifact_source();
        assert!(source.describe().contains("id=abc"));
    }

    #[test]
    fn test_validate_rejects_zero_classes() {
        let mut config = parse(MINIMAL);
        config.model.num_classes = 0;
        assert!(config.model.validate().is_err());

        config.model.num_classes = 30;
        config.model.num_instances = 0;
        assert!(config.model.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let result: Result<LogLevel, _> = "trace".to_string().try_into();
        assert!(result.is_err());

        let result: Result<LogLevel, _> = "DEBUG".to_string().try_into();
        assert_eq!(result.unwrap(), LogLevel::Debug);
    }

    #[test]
    fn test_environment_parsing() {
        let env: Environment = "Production".to_string().try_into().unwrap();
        assert_eq!(env.as_str(), "production");

        let env: Result<Environment, _> = "staging".to_string().try_into();
        assert!(env.is_err());
    }
}
