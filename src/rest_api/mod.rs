//! REST API module
//!
//! Serves health, metrics and a read-only view of APIService availability.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server, ApiState};
