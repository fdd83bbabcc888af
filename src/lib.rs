//! Task Wizard server library
//!
//! This module exports the core components for testing and integration.

pub mod broadcast;
pub mod caldav;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod notifications;
pub mod recurrence;
pub mod server;
pub mod service;
pub mod types;
