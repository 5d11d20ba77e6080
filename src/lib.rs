//! quarry: a material library for CMS content
//!
//! Materials are reusable HTML snippets embedded in many documents through
//! `<div data-material="ID">` markers. Saving a material sanitizes and
//! fingerprints it; editing an auto-update material pushes the new body into
//! every document that embeds it.

pub mod commands;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod library;
pub mod markup;
pub mod meta;
pub mod progress;
pub mod propagate;
pub mod sanitize;

pub use error::{Error, Result};
pub use library::MaterialLibrary;
