//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::CompositorConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    display_count: usize,
    primary_display: String,
    primary_period_ns: i64,
    frame_queue_capacity: usize,
    max_layers: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            error: Some(format!("File not found: {config_path}")),
            config_path,
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let primary = config.primary_display();
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    display_count: config.displays.len(),
                    primary_display: primary.map(|d| d.name.clone()).unwrap_or_default(),
                    primary_period_ns: primary.map(|d| d.period_ns()).unwrap_or_default(),
                    frame_queue_capacity: config.frame_queue.capacity,
                    max_layers: config.transaction.max_layers,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &CompositorConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.vsync.ignore_present_fences {
        warnings.push(
            "vsync.ignore_present_fences is set - model drift will not trigger a resync"
                .to_string(),
        );
    }

    if config.frame_queue.latch_unsignaled {
        warnings.push(
            "frame_queue.latch_unsignaled is set - buffers may be shown before rendering completes"
                .to_string(),
        );
    }

    if !config.scheduler.propagate_backpressure {
        warnings.push("scheduler.propagate_backpressure is off - missed frames will still refresh".to_string());
    }

    if let Some(primary) = config.primary_display() {
        for display in config.displays.iter().skip(1) {
            if (display.refresh_rate_hz - primary.refresh_rate_hz).abs() > f64::EPSILON {
                warnings.push(format!(
                    "Display '{}' runs at {:.2} Hz but is paced by the primary display ({:.2} Hz)",
                    display.name, display.refresh_rate_hz, primary.refresh_rate_hz
                ));
            }
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Displays: {}", summary.display_count);
            println!(
                "  Primary: {} ({} ns period)",
                summary.primary_display, summary.primary_period_ns
            );
            println!("  Frame queue capacity: {}", summary.frame_queue_capacity);
            println!("  Max layers: {}", summary.max_layers);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {warning}");
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DisplayConfig;
    use std::io::Write;

    #[test]
    fn test_default_config_has_no_warnings() {
        assert!(collect_warnings(&CompositorConfig::default()).is_empty());
    }

    #[test]
    fn test_mismatched_refresh_rate_warns() {
        let mut config = CompositorConfig::default();
        config.displays.push(DisplayConfig {
            layer_stack: contracts::LayerStackId(1),
            name: "external".to_string(),
            refresh_rate_hz: 50.0,
            ..DisplayConfig::default()
        });
        config.vsync.ignore_present_fences = true;
        let warnings = collect_warnings(&config);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("external")));
    }

    #[test]
    fn test_validate_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[frame_queue]\ncapacity = 8").unwrap();
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        let result = validate_config(&args);
        assert!(result.valid, "{:?}", result.error);
        assert_eq!(result.summary.map(|s| s.frame_queue_capacity), Some(8));
    }

    #[test]
    fn test_missing_file_invalid() {
        let args = ValidateArgs {
            config: "/nonexistent/framesched.toml".into(),
            json: false,
        };
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
