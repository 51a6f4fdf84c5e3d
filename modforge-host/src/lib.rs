//! Modforge host library
//!
//! This module exports the components of the host binary for embedding and
//! testing.

pub mod config;
pub mod runner;
