//! Secret store API client module.
//!
//! This module provides the `VaultClient` for the store's GCP login,
//! secret listing/reading, pass-through reads and writes, and token
//! self-revocation.

pub mod client;

pub use client::{VaultClient, TOKEN_HEADER};
