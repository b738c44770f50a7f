//! # geofencing-server
//!
//! HTTP server library for the beacon geofencing service.
//!
//! This library provides the API handlers and state management; the
//! `geofencing-server` binary wires them to a listener.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
