//! Echosphere: environmental risk backend for map-drawn urban areas.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod cache;
pub mod data;
pub mod llm;
pub mod engine;
pub mod reports;
pub mod storage;
pub mod api;
