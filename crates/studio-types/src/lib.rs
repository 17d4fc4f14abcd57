//! Shared types for the studio backend.
//!
//! `api` holds the JSON bodies exchanged with clients, `models` holds the
//! small domain enums that both the database layer and the HTTP layer speak.

pub mod api;
pub mod models;
