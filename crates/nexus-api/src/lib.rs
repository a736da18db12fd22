//! Axum routes and composition types for the Core Nexus REST API (§6).

pub mod server;
