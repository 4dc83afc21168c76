//! BookBazaar marketplace API.
//!
//! The server is a library so the router can be driven in-process by tests
//! and tooling; the `bookbazaar-api` binary only wires configuration,
//! logging and the listener around [`routes::app`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
