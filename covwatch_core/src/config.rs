use crate::tracker::DEFAULT_PRIMARY_FUZZER_ID;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ServiceSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_primary_fuzzer_id")]
    pub primary_fuzzer_id: u64,
}

pub fn default_listen_addr() -> String {
    "[::1]:2573".to_string()
}

pub fn default_workers() -> usize {
    4
}

fn default_primary_fuzzer_id() -> u64 {
    DEFAULT_PRIMARY_FUZZER_ID
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            workers: default_workers(),
            primary_fuzzer_id: default_primary_fuzzer_id(),
        }
    }
}

/// How to launch the companion proxy that forwards fuzzer traffic here.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    #[serde(default = "default_proxy_command")]
    pub command: Vec<String>,
    #[serde(default = "default_proxy_listen_addr")]
    pub listen_addr: String,
    pub working_dir: Option<PathBuf>,
}

pub fn default_proxy_command() -> Vec<String> {
    vec!["target/release/observer_proxy".to_string()]
}

pub fn default_proxy_listen_addr() -> String {
    "[::1]:2501".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            command: default_proxy_command(),
            listen_addr: default_proxy_listen_addr(),
            working_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CovwatchConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    /// `None` runs the service without a companion proxy.
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
}

impl CovwatchConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Rejects settings the host cannot run with.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.service.workers == 0 {
            anyhow::bail!("service.workers must be at least 1");
        }
        if let Some(proxy) = &self.proxy {
            if proxy.command.is_empty() {
                anyhow::bail!("proxy.command must name an executable");
            }
        }
        Ok(())
    }
}

impl Default for CovwatchConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            proxy: Some(ProxySettings::default()),
        }
    }
}
