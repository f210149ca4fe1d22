//! nimbus-core - domain model, ports, and shared policy for the Nimbus
//! sync engine
//!
//! This crate is the hub of the hexagonal architecture:
//!
//! ```text
//!             ┌──────────────────────────────┐
//!             │          nimbus-core         │
//!             │  domain entities + newtypes  │
//!             │  ports (traits)              │
//!             │  config, retry policy        │
//!             └──────────────┬───────────────┘
//!        implements          │          drives
//!   ┌────────────────┐       │       ┌────────────────┐
//!   │ nimbus-store   │◄──────┼──────►│ nimbus-engine  │
//!   │ nimbus-transport│      │       │ nimbus-daemon  │
//!   └────────────────┘       │       └────────────────┘
//! ```
//!
//! Nothing in this crate performs I/O except `config` (file load/save) and
//! `retry` (timer sleeps).

pub mod config;
pub mod domain;
pub mod ports;
pub mod retry;
