//! Binding policies: license access, conflict handling and client resolution.

pub mod access;
pub mod conflict;
pub mod resolver;
