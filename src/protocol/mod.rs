//! Records, request payloads and response bodies.

pub mod models;
