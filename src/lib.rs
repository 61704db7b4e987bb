//! Client-side notification polling and enrollment-gated lesson playback for
//! the architecture-education marketplace backend.
pub mod api;
pub mod auth;
pub mod config;
pub mod model;
pub mod notify;
pub mod poller;
pub mod resolver;
