//! Utility functions and helpers.
//!
//! Environment variable handling shared by configuration loading.

pub mod env;

pub use env::{get_env_with_prefix, parse_env, parse_flag};
