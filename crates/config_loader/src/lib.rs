//! # Config Loader
//!
//! 合成器配置加载模块。
//!
//! 负责：
//! - 解析 TOML/JSON 配置文件
//! - 字段范围校验与跨字段校验
//! - 生成 `CompositorConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("framesched.toml")).unwrap();
//! println!("displays: {}", config.displays.len());
//! ```

mod parser;
mod validator;

pub use contracts::CompositorConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Format is picked from the extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<CompositorConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<CompositorConfig, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Validate an already constructed configuration
    pub fn validate(config: &CompositorConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(config: &CompositorConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize configuration to JSON
    pub fn to_json(config: &CompositorConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<CompositorConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DUAL_DISPLAY_TOML: &str = r#"
[vsync]
refresh_skip_count = 1
sf_phase_offset_ns = -2000000

[frame_queue]
latch_unsignaled = true

[[displays]]
layer_stack = 0
name = "internal"
width = 1080
height = 2400
refresh_rate_hz = 90.0

[[displays]]
layer_stack = 1
name = "hdmi"
width = 1920
height = 1080
refresh_rate_hz = 60.0

[observability]
log_format = "json"
metrics_port = 9100
"#;

    #[test]
    fn test_load_from_str_toml() {
        let config = ConfigLoader::load_from_str(DUAL_DISPLAY_TOML, ConfigFormat::Toml)
            .expect("valid config");
        assert_eq!(config.displays.len(), 2);
        assert_eq!(config.primary_display().map(|d| d.name.as_str()), Some("internal"));
        assert_eq!(config.vsync.refresh_skip_count, 1);
        assert!(config.frame_queue.latch_unsignaled);
        assert_eq!(config.observability.metrics_port, Some(9100));
        // untouched sections keep their defaults
        assert_eq!(config.transaction.sync_timeout_ms, 5_000);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = ConfigLoader::load_from_str("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.displays.len(), 1);
        assert_eq!(config.vsync.max_resync_samples, 32);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(DUAL_DISPLAY_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let again = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(again.displays.len(), 2);
        assert_eq!(again.displays[1].name, "hdmi");
        assert_eq!(again.vsync.sf_phase_offset_ns, -2_000_000);
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(DUAL_DISPLAY_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let again = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(again.displays[0].refresh_rate_hz, 90.0);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[[displays]]
layer_stack = 0
name = "a"

[[displays]]
layer_stack = 0
name = "b"
"#;
        let err = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {err}");
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(DUAL_DISPLAY_TOML.as_bytes()).unwrap();
        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.displays.len(), 2);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported"), "got: {err}");
    }
}
