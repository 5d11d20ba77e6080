//! HTML fragment handling
//!
//! This module handles:
//! - Plan-then-apply rewriting of fragments
//! - Tag stripping and title derivation
//! - Embed markers that tie documents to materials

mod marker;
mod rewrite;
mod text;

pub use marker::*;
pub use rewrite::*;
pub use text::*;
