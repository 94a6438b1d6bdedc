//! Venues service: users CRUD and a cached Foursquare venues proxy

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod state;
pub mod validation;

pub use state::AppState;
