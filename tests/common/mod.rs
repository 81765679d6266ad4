//! Common test utilities and fixtures for live-relay integration tests
//!
//! This module provides:
//! - `TestRoot` builder for creating watch roots with state files
//! - helpers for running a relay on an ephemeral port and reading frames

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod relay;
pub mod test_root;

pub use relay::*;
pub use test_root::TestRoot;
