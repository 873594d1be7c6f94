//! HTTP middleware for the small REST surface (health, diagnostics).

pub mod content_type;

pub use content_type::*;
