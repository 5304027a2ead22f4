//! # Rollcall Core
//!
//! Pure domain types for self-service community membership registration.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! All types are plain Rust structs/enums with serde serialization. Stores,
//! chat-platform side effects and the workflow services live in
//! `rollcall-daemon`; ephemeral state and verification codes live in
//! `rollcall-auth`.
//!
//! ## Modules
//!
//! - [`identity`] - Snowflake identifiers for groups, users, roles and channels
//! - [`member`] - Member data, pronouns and in-progress submissions
//! - [`group`] - Per-community registration configuration
//! - [`registration`] - Registration state machine and error taxonomy

pub mod group;
pub mod identity;
pub mod member;
pub mod registration;

// Re-export commonly used types at crate root for convenience.

pub use group::{GroupRegistrationConfig, DEFAULT_REGISTERED_MESSAGE};
pub use identity::{ChannelId, GroupId, RoleId, UserId};
pub use member::{Email, MemberMetadata, MemberProfile, PendingSubmission, Pronouns, UnknownPronouns};
pub use registration::{
    InvalidTransition, RegistrationError, RegistrationEvent, RegistrationState,
    INTERNAL_ERROR_MESSAGE,
};
