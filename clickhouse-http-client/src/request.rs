//! Request assembly.
//!
//! This module turns a statement, its configuration and its call options into
//! an HTTP request:
//! - [`build_statement`]: `POST` with query parameters, headers and body
//! - [`build_ping`]: the `GET /ping` health check

mod builder;

pub(crate) use builder::{build_ping, build_statement};
