pub mod auth;
pub mod bulk;
pub mod error;
pub mod generate;
pub mod history;
pub mod middleware;
pub mod modernize;
pub mod profile;
pub mod routes;
pub mod state;
