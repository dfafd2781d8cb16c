//! Shared data model for the courier workspace.
//!
//! `models` mirrors what the store persists, `events` is what a transport
//! delivers, and `api` holds the operations-API request/response bodies.

pub mod api;
pub mod events;
pub mod models;
