// Typed renderer errors
//
// Most failures travel as anyhow::Error with context attached. The variants
// here are the conditions callers (and tests) want to match on.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// No enumerated GPU satisfies the selection policy.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    #[error("Validation layer requested but not available: {0}")]
    ValidationLayerMissing(String),

    #[error("No supported format among {0:?}")]
    NoSupportedFormat(Vec<vk::Format>),

    /// Mip generation relies on linear-filtered blits.
    #[error("Format {0:?} does not support linear blitting")]
    LinearBlitUnsupported(vk::Format),

    /// Programming error: a layout pair with no barrier recipe.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("Failed to read shader {}: {reason}", path.display())]
    ShaderRead { path: PathBuf, reason: String },

    #[error("Memory of {0} is not host visible")]
    NotHostVisible(&'static str),
}
