//! `/auth/*` endpoints.

use crate::client::{ApiRequest, SessionClient, SessionError};

use super::models::{
    ChangePasswordRequest, DeleteAccountRequest, ForgotPasswordRequest, MessageResponse,
    RefreshRequest, RegisterRequest, RegisteredUser, ResetPasswordRequest, SessionInfo,
    TokenPair, UserProfile, VerifyEmailRequest,
};

pub const LOGIN_PATH: &str = "/auth/token";
pub const REGISTER_PATH: &str = "/auth/register";
pub const ME_PATH: &str = "/auth/me";
/// Never subject to refresh-and-retry
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const LOGOUT_ALL_PATH: &str = "/auth/logout-all";
pub const CHANGE_PASSWORD_PATH: &str = "/auth/change-password";
pub const SEND_VERIFICATION_PATH: &str = "/auth/send-verification-email";
pub const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const SESSIONS_PATH: &str = "/auth/sessions";
pub const ACCOUNT_PATH: &str = "/auth/account";

/// Exchange credentials for a token pair (OAuth2 password form; the email goes in `username`).
pub async fn login(
    client: &SessionClient,
    email: &str,
    password: &str,
) -> Result<TokenPair, SessionError> {
    let request = ApiRequest::post(LOGIN_PATH)
        .form(&[("username", email), ("password", password)])
        .without_refresh();
    client.send_json(request).await
}

pub async fn register(
    client: &SessionClient,
    registration: &RegisterRequest,
) -> Result<RegisteredUser, SessionError> {
    let request = ApiRequest::post(REGISTER_PATH)
        .json(registration)?
        .without_refresh();
    client.send_json(request).await
}

pub async fn me(client: &SessionClient) -> Result<UserProfile, SessionError> {
    client.send_json(ApiRequest::get(ME_PATH)).await
}

/// Revoke one refresh token server-side.
pub async fn logout(client: &SessionClient, refresh_token: &str) -> Result<(), SessionError> {
    let request = ApiRequest::post(LOGOUT_PATH).json(&RefreshRequest { refresh_token })?;
    client.send(request).await?;
    Ok(())
}

/// Revoke every refresh token of the current user.
pub async fn logout_all(client: &SessionClient) -> Result<MessageResponse, SessionError> {
    client.send_json(ApiRequest::post(LOGOUT_ALL_PATH)).await
}

pub async fn change_password(
    client: &SessionClient,
    old_password: &str,
    new_password: &str,
) -> Result<MessageResponse, SessionError> {
    let request = ApiRequest::post(CHANGE_PASSWORD_PATH).json(&ChangePasswordRequest {
        old_password,
        new_password,
    })?;
    client.send_json(request).await
}

pub async fn send_verification_email(
    client: &SessionClient,
) -> Result<MessageResponse, SessionError> {
    client
        .send_json(ApiRequest::post(SEND_VERIFICATION_PATH))
        .await
}

pub async fn verify_email(
    client: &SessionClient,
    token: &str,
) -> Result<MessageResponse, SessionError> {
    let request = ApiRequest::post(VERIFY_EMAIL_PATH).json(&VerifyEmailRequest { token })?;
    client.send_json(request).await
}

pub async fn forgot_password(
    client: &SessionClient,
    email: &str,
) -> Result<MessageResponse, SessionError> {
    let request = ApiRequest::post(FORGOT_PASSWORD_PATH)
        .json(&ForgotPasswordRequest { email })?
        .without_refresh();
    client.send_json(request).await
}

pub async fn reset_password(
    client: &SessionClient,
    token: &str,
    new_password: &str,
) -> Result<MessageResponse, SessionError> {
    let request = ApiRequest::post(RESET_PASSWORD_PATH)
        .json(&ResetPasswordRequest {
            token,
            new_password,
        })?
        .without_refresh();
    client.send_json(request).await
}

pub async fn sessions(client: &SessionClient) -> Result<Vec<SessionInfo>, SessionError> {
    client.send_json(ApiRequest::get(SESSIONS_PATH)).await
}

pub async fn revoke_session(
    client: &SessionClient,
    session_id: i64,
) -> Result<MessageResponse, SessionError> {
    client
        .send_json(ApiRequest::delete(format!("{SESSIONS_PATH}/{session_id}")))
        .await
}

pub async fn delete_account(
    client: &SessionClient,
    password: &str,
) -> Result<MessageResponse, SessionError> {
    let request = ApiRequest::delete(ACCOUNT_PATH).json(&DeleteAccountRequest { password })?;
    client.send_json(request).await
}
