//! Verification primitives for rollcall.
//!
//! This crate holds no durable state:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//!
//! It provides the short-lived pieces of the registration workflow:
//! - [`ephemeral`] - TTL-scoped key-value stores swept by a shared [`Janitor`]
//! - [`pin`] - One-time 4-digit verification codes scoped per group
//! - [`email`] - Email host allow-list and the external [`EmailVerifier`] seam
//!
//! Background sweeping runs on the tokio runtime of whoever starts the
//! [`Janitor`].

pub mod email;
pub mod ephemeral;
pub mod pin;

pub use email::{EmailHosts, EmailRejection, EmailVerifier, VerifyError};
pub use ephemeral::{EphemeralStore, Janitor, Registration, Sweep};
pub use pin::{Pin, PinError, PinRegistry};
