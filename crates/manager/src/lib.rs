//! Formloom plugin manager library.
//!
//! Exposes the manager's services for the `plugin-manager` binary and for
//! integration tests.

pub mod bus;
pub mod cli;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod event_router;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod poller;
pub mod registry;
pub mod routes;
pub mod state;
