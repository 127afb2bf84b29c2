//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: durable tokens, cached user and derived expiry
//! - `token`: advisory JWT claim decoding
//! - `SessionManager`: the session state machine, its periodic revalidation,
//!   and cross-context synchronization

pub mod credentials;
pub mod session;
mod sync;
pub mod token;

pub use credentials::CredentialStore;
pub use session::{
    ActionOutcome, LoginOutcome, SessionManager, SessionOptions, SessionPhase, SessionState,
    SignupOutcome,
};
pub use token::TokenClaims;
