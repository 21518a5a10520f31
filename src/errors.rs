//! Error Types
//!
//! This module defines the error type used throughout the overlay core.
//!
//! # Overview
//!
//! [`GlazeError`] covers every failure mode the core reports:
//! - Swap chain and heap initialization failures
//! - Submission, presentation and fence synchronization failures
//! - Shader compilation and pipeline construction failures
//! - Resource and descriptor exhaustion
//!
//! Recoverable misuse (double frees, untracked resources, lookups of
//! unknown handles) is logged and reported through return values instead.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, GlazeError>`.
//!
//! ```rust,ignore
//! use glaze::errors::{GlazeError, Result};
//!
//! fn present() -> Result<()> {
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use crate::hal::{DescriptorCategory, FenceValue};

/// The main error type for the overlay core.
#[derive(Debug, thiserror::Error)]
pub enum GlazeError {
    // ========================================================================
    // Initialization Errors
    // ========================================================================
    /// The swap chain could not be created or resized.
    #[error("Failed to create swap chain: {0}")]
    SwapChainCreation(String),

    /// A descriptor heap could not be created.
    #[error("Failed to create {category:?} descriptor heap: {reason}")]
    HeapCreation {
        category: DescriptorCategory,
        reason: String,
    },

    // ========================================================================
    // Per-Frame Errors
    // ========================================================================
    /// A command list could not be submitted to the queue.
    #[error("Command list submission failed: {0}")]
    SubmissionFailed(String),

    /// The swap chain refused to present.
    #[error("Present failed: {0}")]
    PresentFailed(String),

    /// The device was removed or reset. Unrecoverable for this instance.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// A fence wait exceeded the configured bound.
    #[error("Timed out after {waited:?} waiting for fence value {value}")]
    FenceTimeout { value: FenceValue, waited: Duration },

    /// A frame lifecycle call arrived in the wrong order.
    #[error("Invalid frame state: {0}")]
    InvalidFrameState(&'static str),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// The device could not create a resource.
    #[error("Failed to create resource '{label}': {reason}")]
    ResourceCreation { label: String, reason: String },

    /// Every slot in a descriptor heap is in use.
    #[error("Descriptor heap exhausted: {category:?} (capacity {capacity})")]
    OutOfDescriptors {
        category: DescriptorCategory,
        capacity: u32,
    },

    /// A request cannot fit even after evicting every unpinned resource.
    #[error(
        "Resource cache budget exceeded: {requested} bytes requested with {pinned} pinned \
         (ceiling {ceiling})"
    )]
    BudgetExceeded {
        requested: u64,
        pinned: u64,
        ceiling: u64,
    },

    /// A handle does not refer to a live resource.
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// A submitted pixel buffer does not match its declared dimensions.
    #[error("Invalid pixel buffer: {0}")]
    InvalidPixelBuffer(String),

    // ========================================================================
    // Pipeline Errors
    // ========================================================================
    /// A shader failed to compile for the requested profile.
    #[error("Shader compilation failed ({entry_point}, {profile}): {reason}")]
    ShaderCompilation {
        entry_point: String,
        profile: &'static str,
        reason: String,
    },

    /// The device rejected a pipeline description.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A shader template could not be rendered.
    #[error("Shader template error: {0}")]
    ShaderTemplate(#[from] minijinja::Error),
}

impl GlazeError {
    /// Whether the error leaves the renderer unusable.
    ///
    /// Fatal errors must be surfaced to the host, which tears the renderer
    /// down. Everything else can be retried or skipped for a frame.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SwapChainCreation(_)
                | Self::HeapCreation { .. }
                | Self::SubmissionFailed(_)
                | Self::PresentFailed(_)
                | Self::DeviceLost(_)
                | Self::FenceTimeout { .. }
        )
    }
}

/// Alias for `Result<T, GlazeError>`.
pub type Result<T> = std::result::Result<T, GlazeError>;
