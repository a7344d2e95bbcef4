pub mod app;
pub mod common;
pub mod config;
pub mod context;
pub mod domain;
pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod server;
