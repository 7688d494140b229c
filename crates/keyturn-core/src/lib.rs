//! Keyturn Core - Business logic and state machines for operating a lock
//! over a short-range, chunked, unreliable radio link.
//!
//! This crate implements:
//! - The lock session state machine (connect, discover, subscribe,
//!   pair via ticket, encrypted command dispatch)
//! - Frame reassembly for the fixed 41-byte secure-channel frames
//! - Request/response opcode tables
//! - Collaborator interfaces: transport, key backend, lock storage,
//!   audit log
//! - Error taxonomy and failure classification
//! - An in-process simulated lock for tests and demos

#![forbid(unsafe_code)]

// Core state machine
pub mod session;
pub mod driver;

// Wire handling
pub mod frame;
pub mod codes;

// Collaborator interfaces
pub mod transport;
pub mod backend;
pub mod audit;

// Supporting modules
pub mod errors;
pub mod config;
pub mod harness;

// Optional backend implementations
#[cfg(feature = "http-key-service")]
pub mod http_key_service;
