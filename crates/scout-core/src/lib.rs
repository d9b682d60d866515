//! # Scout Core
//!
//! Configuration and error types shared by the scheduler, the gateway and the
//! `scout` binary.

pub mod config;
pub mod error;

pub use config::ScoutConfig;
pub use error::{Result, ScoutError};
