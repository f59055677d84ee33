use anyhow::{Context, Result};
use chargerybms_lib::protocol::Config;
use chargerybms_lib::snapshot::FileSink;
use serde::Deserialize;
use std::path::PathBuf;

/// Where snapshots go and how their metrics are named.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PublishConfig {
    #[serde(default = "PublishConfig::default_directory")]
    directory: PathBuf,
    #[serde(default = "PublishConfig::default_sys_file")]
    sys_file: String,
    #[serde(default = "PublishConfig::default_impedance_file")]
    impedance_file: String,
    #[serde(default = "PublishConfig::default_metric_name")]
    metric_name: String,
    #[serde(default = "PublishConfig::default_impedance_metric_name")]
    impedance_metric_name: String,
}

impl PublishConfig {
    fn default_directory() -> PathBuf {
        FileSink::DEFAULT_DIRECTORY.into()
    }

    fn default_sys_file() -> String {
        FileSink::DEFAULT_SYS_FILE.into()
    }

    fn default_impedance_file() -> String {
        FileSink::DEFAULT_IMPEDANCE_FILE.into()
    }

    fn default_metric_name() -> String {
        Config::DEFAULT_METRIC_NAME.into()
    }

    fn default_impedance_metric_name() -> String {
        Config::DEFAULT_IMPEDANCE_METRIC_NAME.into()
    }

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    pub fn apply(&self, config: Config) -> Config {
        config.with_metric_names(&self.metric_name, &self.impedance_metric_name)
    }

    pub fn file_sink(&self) -> FileSink {
        FileSink::in_directory(&self.directory, &self.sys_file, &self.impedance_file)
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            directory: Self::default_directory(),
            sys_file: Self::default_sys_file(),
            impedance_file: Self::default_impedance_file(),
            metric_name: Self::default_metric_name(),
            impedance_metric_name: Self::default_impedance_metric_name(),
        }
    }
}
