//! Redmine remote API: domain types, wire types and the REST client.

pub mod api_types;
pub mod client;
pub mod types;

pub use client::{ConnectionParams, Connector, RedmineConnector, RemoteClient};
