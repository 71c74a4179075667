//! Contract Pipeline - Document Processing and Risk Analysis
//!
//! A Rust library that takes uploaded contract documents through text
//! extraction and language-model analysis, scores their risk and serves the
//! results through read-only query projections.
//!
//! # Features
//!
//! - Upload intake with time-limited upload credentials
//! - Synchronous and job-based text extraction
//! - AI analysis with sentiment and entity enrichment
//! - Bounded risk scoring
//! - Lifecycle status tracking for every contract
//! - Owner-scoped queries with opaque pagination

/// Transport-agnostic API router
pub mod api;
/// AI analysis stage
pub mod analysis;
/// Configuration management
pub mod config;
/// Embedded metadata store
pub mod db;
/// Error types
pub mod error;
/// Text extraction stage
pub mod extraction;
/// Upload intake stage
pub mod intake;
/// Contract lifecycle states and transitions
pub mod lifecycle;
/// Plain-text extraction service
pub mod local_extractor;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Rule-based sentiment and entity detection
pub mod nlp;
/// Language model client
pub mod ollama;
/// In-process stage sequencing
pub mod orchestrator;
/// Query projections
pub mod query;
/// Repository pattern for data access
pub mod repository;
/// Risk scoring
pub mod risk;
/// Collaborator service interfaces
pub mod services;
/// Best-effort status tracking
pub mod status;
/// Filesystem object storage
pub mod storage;
/// Small shared helpers
pub mod utils;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use db::Database;
pub use error::{ErrorKind, PlatformError, Result};
pub use lifecycle::ContractStatus;
pub use models::ContractRecord;
pub use nlp::NlpProcessor;
pub use repository::{ContractStore, MemoryContractStore};
