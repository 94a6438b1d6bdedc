//! Common library for the venues service
//!
//! This crate provides the infrastructure shared by the service: the
//! request-scoped context, structured JSON logging, the domain error taxonomy,
//! the cache port and its backends, PostgreSQL pooling, and a retrying REST
//! client.

pub mod cache;
pub mod context;
pub mod database;
pub mod error;
pub mod jsonlogs;
pub mod log;
pub mod rest;

pub use context::Ctx;
pub use error::{DomainError, ErrorKind};
pub use log::{Level, LogBody, LogProvider};
