//! Relay node library: configuration, board drivers and the HTTP API the
//! coordinator talks to.

pub mod config;
pub mod driver;
pub mod http;
