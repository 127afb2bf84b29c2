// ===== Authentication and account endpoints =====

use super::{ApiClient, ApiError};
use crate::models::{
    AuthResponse, ChangePasswordRequest, DeleteAccountRequest, EmailRequest, LoginRequest,
    MeResponse, MessageResponse, RegisterResponse, ResetPasswordRequest,
    SignupRequest, UpdateProfileRequest,
};

impl ApiClient {
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        self.post("/login", request).await
    }

    /// Create an account. No token is issued; the account must be verified first.
    pub async fn register(&self, request: &SignupRequest) -> Result<RegisterResponse, ApiError> {
        self.post("/register", request).await
    }

    /// Validate the current session server-side and fetch the authoritative user.
    pub async fn me(&self) -> Result<MeResponse, ApiError> {
        self.get("/me").await
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> Result<MessageResponse, ApiError> {
        self.post("/change-password", request).await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<MessageResponse, ApiError> {
        self.post(
            "/request-password-reset",
            &EmailRequest {
                email: email.to_string(),
            },
        )
        .await
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<MessageResponse, ApiError> {
        self.post("/reset-password", request).await
    }

    pub async fn verify_email(&self, token: &str) -> Result<MessageResponse, ApiError> {
        self.get(&format!("/verify-email/{}", urlencoding::encode(token))).await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<MessageResponse, ApiError> {
        self.post(
            "/resend-verification",
            &EmailRequest {
                email: email.to_string(),
            },
        )
        .await
    }

    pub async fn update_profile(&self, request: &UpdateProfileRequest) -> Result<MessageResponse, ApiError> {
        self.put("/update-profile", request).await
    }

    pub async fn delete_account(&self, request: &DeleteAccountRequest) -> Result<MessageResponse, ApiError> {
        self.delete("/delete-account", Some(request)).await
    }
}
