//! Layered error definitions
//!
//! Categorized by source: config / vsync / scene / frame queue

use thiserror::Error;

use crate::SurfaceId;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Vsync Errors =====
    /// The same callback was registered twice
    #[error("vsync listener '{name}' is already registered")]
    DuplicateListener { name: String },

    /// Removal or phase change for a callback that was never registered
    #[error("vsync listener not found")]
    ListenerNotFound,

    // ===== Scene Errors =====
    /// Surface id does not resolve to a live surface
    #[error("surface {surface} not found")]
    SurfaceNotFound { surface: SurfaceId },

    /// Layer count limit reached
    #[error("layer limit reached: {count} >= {max}")]
    LayerLimit { count: usize, max: usize },

    // ===== Frame Queue Errors =====
    /// Producer broke the strictly-increasing frame number contract
    #[error("surface {surface}: frame {got} delivered out of order (expected {expected})")]
    FrameOutOfOrder {
        surface: SurfaceId,
        expected: u64,
        got: u64,
    },

    /// Bounded frame queue is full
    #[error("surface {surface}: frame queue full (capacity {capacity})")]
    FrameQueueFull { surface: SurfaceId, capacity: usize },

    /// Consumer side of the frame queue is gone
    #[error("surface {surface}: frame queue closed")]
    FrameQueueClosed { surface: SurfaceId },

    /// Content acquisition failed; frames are refused until the quarantine
    /// is reset
    #[error("surface {surface}: frame queue quarantined after acquisition failure")]
    FrameQueueQuarantined { surface: SurfaceId },

    /// `on_frame_replaced` with nothing queued
    #[error("surface {surface}: no queued frame to replace")]
    EmptyFrameQueue { surface: SurfaceId },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create duplicate listener error
    pub fn duplicate_listener(name: impl Into<String>) -> Self {
        Self::DuplicateListener { name: name.into() }
    }

    /// Create surface-not-found error
    pub fn surface_not_found(surface: SurfaceId) -> Self {
        Self::SurfaceNotFound { surface }
    }
}
