//! Data models for the libris client.
//!
//! - `user`: the cached identity snapshot
//! - `auth`: request and response bodies of the authentication endpoints

pub mod auth;
pub mod user;

pub use auth::{
    AuthResponse, ChangePasswordRequest, DeleteAccountRequest, EmailRequest, LoginRequest,
    LogoutRequest, MeResponse, MessageResponse, RefreshRequest, RegisterResponse,
    ResetPasswordRequest, SignupRequest, UpdateProfileRequest,
};
pub use user::UserSnapshot;
