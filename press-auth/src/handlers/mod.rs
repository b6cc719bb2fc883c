//! HTTP handlers for press-auth.

pub mod admin;
pub mod auth;
pub mod metrics;
pub mod well_known;
