//! Authenticated access to the vendor property-data APIs

pub mod client;

pub use client::GseClient;
