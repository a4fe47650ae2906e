//! Core types shared across the edge router.

pub mod error;

pub use error::{ErrorContext, ErrorExposure, RouterError, RouterResult};
