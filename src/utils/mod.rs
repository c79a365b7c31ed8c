//! Shared helpers for the segmentation pipeline

pub mod preprocessing;
pub mod validation;

pub use preprocessing::ImagePreprocessor;
pub use validation::{ModelValidator, TensorValidator};
