pub mod app;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fits;
pub mod output;
pub mod registry;
pub mod store;
pub mod votable;
