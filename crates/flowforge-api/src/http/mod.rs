//! HTTP surface for Flowforge.
//!
//! Axum router with the management API under `/api/v1/` and the HTTP
//! trigger receiver under `/hooks/`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
