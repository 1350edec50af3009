//! Infrastructure layer: interaction with external systems
//!
//! Matrix homeserver, Google, SQLite, HTTP frontend and logging

pub mod auth;
pub mod logger;
pub mod matrix;
pub mod store;
pub mod web;
