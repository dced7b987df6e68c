//! Domain logic for the URL-to-PDF render worker.
//!
//! Lives below every other crate in the workspace and has no internal
//! dependencies: error types, job identity and status, conversion request
//! validation, request signing, and PDF watermarking.

pub mod convert;
pub mod error;
pub mod job;
pub mod signature;
pub mod watermark;
