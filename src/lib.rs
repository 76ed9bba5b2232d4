//! Redoom ledger - an append-only chain of proof-of-work sealed records
//!
//! # Architecture
//!
//! ## Core Ledger
//! - [`blockchain`] - Records, canonical hashing, the ledger and its integrity checks
//! - [`miner`] - Proof-of-work search with optional cancellation
//!
//! ## Service
//! - [`documents`] - Users, posts and comments sealed by ledger records
//! - [`persistence`] - Database layer (SQLite) and in-memory backend
//! - [`node`] - Start-up wiring: store, rehydrated ledger, configuration
//! - [`api`] - HTTP endpoints
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod miner;

// ============================================================================
// Service
// ============================================================================
pub mod documents;
pub mod node;
pub mod persistence;

#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
