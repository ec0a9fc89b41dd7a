//! HTTP surface and services for anonbox.
//!
//! Handlers are thin: each one extracts its inputs, calls the service
//! function of the same module with an explicit timestamp and identity, and
//! turns the result into a `{success, ...}` body. Failures of every kind
//! flow through [`error::ApiError`].

pub mod accept;
pub mod auth;
pub mod completion;
pub mod error;
pub mod extract;
pub mod mailer;
pub mod messages;
pub mod middleware;
pub mod registration;
pub mod router;
pub mod state;
pub mod suggest;
pub mod validation;
pub mod verification;

pub use router::app;
pub use state::{AppState, AppStateInner};
