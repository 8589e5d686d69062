//! Core types shared across the multiplexer
//!
//! This module contains the fundamental identity types:
//! - Topic: logical stream identifier (provider + channel + instrument)
//! - Params: scalar parameter map with canonical serialization

pub mod params;
pub mod topic;

pub use params::{ParamValue, Params};
pub use topic::Topic;
