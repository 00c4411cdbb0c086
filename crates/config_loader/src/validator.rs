//! 配置校验模块
//!
//! 校验规则：
//! - 字段范围 (由 `validator` 派生宏声明在 contracts 中)
//! - 至少一个显示器
//! - layer_stack 唯一, 显示器名称唯一
//! - min_resync_samples_for_update <= max_resync_samples
//! - 0 < min_event_spacing_ratio <= 1
//! - 相位偏移的绝对值小于主显示器的刷新周期

use std::collections::HashSet;

use ::validator::Validate;
use contracts::{CompositorConfig, ContractError};

/// 校验 CompositorConfig
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &CompositorConfig) -> Result<(), ContractError> {
    validate_ranges(config)?;
    validate_displays(config)?;
    validate_resync_samples(config)?;
    validate_event_spacing(config)?;
    validate_phase_offsets(config)?;
    Ok(())
}

/// 派生宏声明的范围约束
fn validate_ranges(config: &CompositorConfig) -> Result<(), ContractError> {
    config
        .validate()
        .map_err(|e| ContractError::config_validation("config", e.to_string()))
}

/// 显示器列表非空, layer_stack 与名称唯一
fn validate_displays(config: &CompositorConfig) -> Result<(), ContractError> {
    if config.displays.is_empty() {
        return Err(ContractError::config_validation(
            "displays",
            "at least one display is required",
        ));
    }
    let mut stacks = HashSet::new();
    let mut names = HashSet::new();
    for display in &config.displays {
        if !stacks.insert(display.layer_stack) {
            return Err(ContractError::config_validation(
                format!("displays[layer_stack={}]", display.layer_stack.0),
                "duplicate layer_stack",
            ));
        }
        if !names.insert(display.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("displays[name={}]", display.name),
                "duplicate display name",
            ));
        }
    }
    Ok(())
}

fn validate_resync_samples(config: &CompositorConfig) -> Result<(), ContractError> {
    let vsync = &config.vsync;
    if vsync.min_resync_samples_for_update > vsync.max_resync_samples {
        return Err(ContractError::config_validation(
            "vsync.min_resync_samples_for_update",
            format!(
                "must not exceed max_resync_samples ({} > {})",
                vsync.min_resync_samples_for_update, vsync.max_resync_samples
            ),
        ));
    }
    Ok(())
}

fn validate_event_spacing(config: &CompositorConfig) -> Result<(), ContractError> {
    let ratio = config.vsync.min_event_spacing_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(ContractError::config_validation(
            "vsync.min_event_spacing_ratio",
            format!("must be in (0, 1], got {ratio}"),
        ));
    }
    Ok(())
}

/// 偏移超过一个周期时等价于更小的偏移, 视为配置错误
fn validate_phase_offsets(config: &CompositorConfig) -> Result<(), ContractError> {
    let Some(primary) = config.primary_display() else {
        return Ok(());
    };
    let period = primary.period_ns();
    for (field, offset) in [
        ("vsync.app_phase_offset_ns", config.vsync.app_phase_offset_ns),
        ("vsync.sf_phase_offset_ns", config.vsync.sf_phase_offset_ns),
    ] {
        if offset.abs() >= period {
            return Err(ContractError::config_validation(
                field,
                format!("|{offset}| must be below the primary period ({period} ns)"),
            ));
        }
    }
    Ok(())
}
