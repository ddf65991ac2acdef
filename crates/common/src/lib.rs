//! # lutnet-common: Shared Configuration
//!
//! Types shared by every crate in the workspace:
//!
//! * **[`LayerConfig`]**: layer hyper-parameters (serialised as JSON).
//! * **[`KernelKind`]**: resolved evaluation path (plain / LUT × binary / clipped).
//! * **[`LutError`]** / **[`ConfigError`]**: error hierarchy.

pub mod config;
pub mod error;

pub use config::{ConvGeometry, KernelKind, LayerConfig, Padding};
pub use error::{ConfigError, LutError, LutResult};
