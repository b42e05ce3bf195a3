//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - PostgreSQL connection pool
//! - Room membership lookups against the chat store
//! - Prometheus metrics

pub mod database;
pub mod metrics;
pub mod repositories;
