use crate::backend::BackendSettings;
use crate::device::DeviceProfile;
use crate::voice::{OrchestratorConfig, DEFAULT_DEBUG_CAPACITY, DEFAULT_VOICE};
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub device: DeviceProfile,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_voice")]
    pub default_voice: String,
    /// 0 disables the timeout
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_debug_capacity")]
    pub debug_capacity: usize,
    #[serde(default)]
    pub primary: BackendSettings,
    #[serde(default)]
    pub fallback: BackendSettings,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub path: String,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_operation_timeout_ms() -> u64 {
    15_000
}

fn default_debug_capacity() -> usize {
    DEFAULT_DEBUG_CAPACITY
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            default_voice: default_voice(),
            operation_timeout_ms: default_operation_timeout_ms(),
            debug_capacity: default_debug_capacity(),
            primary: BackendSettings::default(),
            fallback: BackendSettings::default(),
        }
    }
}

impl VoiceConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_voice: self.default_voice.clone(),
            operation_timeout: (self.operation_timeout_ms > 0)
                .then(|| Duration::from_millis(self.operation_timeout_ms)),
            debug_capacity: self.debug_capacity,
        }
    }
}

impl Config {
    /// Load `path` (any format the `config` crate understands), then apply
    /// `LARK_`-prefixed environment overrides, e.g.
    /// `LARK_DEVICE__FORCE_CONSTRAINED=true`
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("LARK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_applies_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "lark-voice"

[service.http]
bind = "127.0.0.1"
port = 8080

[storage]
path = "/tmp/lark-chat"
"#
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(cfg.service.http.port, 8080);
        assert_eq!(cfg.voice.default_voice, "ash");
        assert_eq!(cfg.voice.primary, BackendSettings::default());
        assert!(!cfg.device.force_constrained);

        let orchestrator = cfg.voice.orchestrator_config();
        assert_eq!(orchestrator.operation_timeout, Some(Duration::from_secs(15)));
        assert_eq!(orchestrator.debug_capacity, 50);
    }

    #[test]
    fn test_zero_timeout_disables_bound() {
        let voice = VoiceConfig {
            operation_timeout_ms: 0,
            ..Default::default()
        };

        assert_eq!(voice.orchestrator_config().operation_timeout, None);
    }
}
