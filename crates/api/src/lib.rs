//! HTTP API over the job service: routing, auth, request/response mapping,
//! and the wiring used by the `kitchenline-api` binary.

pub mod app;
pub mod config;
pub mod middleware;
