//! Rollcall daemon library.
//!
//! Stores, chat-platform seams, the registration and admin services, and the
//! dispatcher that ties them to an event source.

pub mod config;
pub mod dispatch;
pub mod interaction;
pub mod mail;
pub mod platform;
pub mod services;
pub mod shutdown;
pub mod stdio;
pub mod store;
