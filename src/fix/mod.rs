//! Ecosystem plugins.

pub mod maven;
pub mod python;
