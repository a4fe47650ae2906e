//! Edge request router built on pingora.
//!
//! A single HTTP entry point dispatches requests to in-process route
//! handlers (cache-aside pages, task launches, endpoint introspection) or
//! forwards them untouched to backing listeners.

#![allow(clippy::upper_case_acronyms)]

pub mod admin;
pub mod backend;
pub mod config;
pub mod core;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod router;
pub mod service;
pub(crate) mod utils;
