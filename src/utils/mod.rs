//! Utility helpers

pub mod image;
pub mod math;
