//! Core data models for the upload gateway.
//!
//! Identifiers, the object descriptor and the authorization tokens that
//! flow through a single upload.

pub mod ids;
pub mod object;
pub mod token;
