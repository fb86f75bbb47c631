//! rollcalld: attendance daemon library.
//!
//! Wires the core pipeline to SQLite, the filesystem, an extraction worker
//! pool and an axum HTTP API. `main.rs` only parses arguments and assembles
//! these pieces.

pub mod api;
pub mod capture;
pub mod config;
pub mod rollover;
pub mod roster;
pub mod store;
pub mod workers;
