#![cfg_attr(not(test), forbid(unsafe_code))]

//! LexLink relay server library.
//!
//! The interesting part lives in [`services::relay`]: the stream relay core
//! that forwards upstream SSE token streams to the browser and substitutes a
//! local fallback generator when the upstream is unreachable.

pub mod app_state;
pub mod http;
pub mod openapi;
pub mod server;
pub mod services;

pub(crate) mod db;
pub(crate) mod handlers;
pub mod middleware;
pub(crate) mod routes;
pub(crate) mod tracer;
