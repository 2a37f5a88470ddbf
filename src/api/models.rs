use serde::{Deserialize, Serialize};

// ============================================================================
// Tokens
// ============================================================================

/// Token pair issued by `POST /auth/token`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Body of `POST /auth/refresh`. Both fields are optional on the wire so a
/// malformed response can be told apart from a transport failure.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Junior,
    Middle,
    Senior,
    Lead,
}

/// Current user as returned by `GET /auth/me` and the profile endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub grade: Option<Grade>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/register`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredUser {
    pub id: i64,
    pub email: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial update for `PUT /users/me/profile`; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<Grade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

// ============================================================================
// Account management
// ============================================================================

/// Active refresh-token session as listed by `GET /auth/sessions`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    pub id: i64,
    #[serde(default)]
    pub device_info: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub last_used_at: Option<String>,
    #[serde(default)]
    pub is_current: bool,
}

/// `{"message": ...}` acknowledgement returned by most account endpoints
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordRequest<'a> {
    pub old_password: &'a str,
    pub new_password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct VerifyEmailRequest<'a> {
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordRequest<'a> {
    pub token: &'a str,
    pub new_password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DeleteAccountRequest<'a> {
    pub password: &'a str,
}
