//! Tamper-evident seal provisioning and verification engine.
//!
//! This crate provides:
//! - P-256 key pairs, random challenges, and ECDSA signature checks for
//!   challenge-response tag authentication
//! - AES-256-GCM encryption of seal private keys at rest under an externally
//!   supplied master key
//! - A closed seal state machine (provision, attach, verify, remove,
//!   report-damage) with per-seal serialization of the verify path
//! - Monotonic-counter and location anomaly detection over untrusted reader
//!   input
//! - A deterministic 0-100 integrity score per seal
//! - A persistence port with in-memory and SQLite implementations
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;

pub mod anomaly;
pub mod config;
pub mod crypto;
pub mod reader;
pub mod score;
pub mod seal;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod util;
