//! Cloud identity side of the trust chain.
//!
//! This module provides:
//! - `CredentialSource`: ambient credential acquisition (GCP ADC by default)
//! - `AssertionSigner`: exchanges the credential for a signed, 15-minute JWT
//!
//! The resulting `SignedAssertion` is what the secret store accepts at login.

pub mod assertion;
pub mod credentials;

pub use assertion::{AssertionSigner, ClaimSet, SignedAssertion, ASSERTION_LIFETIME_SECS};
pub use credentials::{BaseCredential, CredentialSource, GcpCredentialSource, CLOUD_PLATFORM_SCOPE};
