//! Breaker-protected HTTP calls to collaborator services.

mod client;

pub use client::{CallError, ServiceClient, ServiceResponse, DEFAULT_FALLBACK_MESSAGE};
pub use reqwest::Method;
