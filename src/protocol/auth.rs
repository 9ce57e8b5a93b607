//! Account and session types.
//!
//! # Example Response
//!
//! `POST /api/auth/login`:
//!
//! ```json
//! {
//!     "tokens": {
//!         "accessToken": "secret_token",
//!         "refreshToken": "secret_refresh_token",
//!         "expiresIn": 900,
//!         "refreshExpiresIn": 604800
//!     },
//!     "user": {
//!         "id": "65f0c1...",
//!         "name": "Ada",
//!         "email": "ada@example.com",
//!         "contactNumber": "+44 20 7946 0000",
//!         "isGoogleUser": false,
//!         "isEmailVerified": true,
//!         "createdAt": "2024-03-01T12:00:00Z"
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use veil::Redact;

use crate::tokens::TokenPair;

pub const REGISTER: &str = "/api/auth/register";
pub const LOGIN: &str = "/api/auth/login";
pub const LOGOUT: &str = "/api/auth/logout";
pub const PROFILE: &str = "/api/auth/profile";
pub const CHANGE_PASSWORD: &str = "/api/auth/change-password";
pub const FORGOT_PASSWORD: &str = "/api/auth/forgot-password";
pub const RESET_PASSWORD: &str = "/api/auth/reset-password";
pub const REFRESH_TOKEN: &str = "/api/auth/refresh-token";
pub const GOOGLE: &str = "/api/auth/google";
pub const GOOGLE_OAUTH_COMPLETE: &str = "/api/auth/google-oauth-complete";

/// Identity of the signed-in user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(alias = "_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,

    /// Whether the account was created through federated sign-in
    #[serde(default, alias = "isGoogleUser")]
    pub is_federated: bool,

    #[serde(default, alias = "isEmailVerified")]
    pub email_verified: bool,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

impl UserIdentity {
    /// Takes over the fields present in `other`. Empty strings and missing
    /// optional fields keep their current value. The account flags are
    /// kept, as a profile update cannot change them.
    pub fn merge(&mut self, other: UserIdentity) {
        let UserIdentity {
            id,
            name,
            email,
            contact_number,
            is_federated: _,
            email_verified: _,
            created_at,
            updated_at,
        } = other;

        for (current, update) in [
            (&mut self.id, id),
            (&mut self.name, name),
            (&mut self.email, email),
        ] {
            if !update.is_empty() {
                *current = update;
            }
        }

        if contact_number.is_some() {
            self.contact_number = contact_number;
        }
        if created_at.is_some() {
            self.created_at = created_at;
        }
        if updated_at.is_some() {
            self.updated_at = updated_at;
        }
    }
}

/// Identity payload, either `{ "user": { ... } }` or the user itself.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UserPayload {
    Wrapped { user: UserIdentity },
    Bare(UserIdentity),
}

impl From<UserPayload> for UserIdentity {
    fn from(payload: UserPayload) -> Self {
        match payload {
            UserPayload::Wrapped { user } | UserPayload::Bare(user) => user,
        }
    }
}

#[derive(Clone, Serialize, Redact)]
pub struct Credentials {
    pub email: String,

    #[redact]
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Sign-up form.
#[derive(Clone, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,

    pub email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,

    #[redact]
    pub password: String,
}

/// Tokens and identity handed out on sign-in.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SignedIn {
    pub tokens: TokenPair,
    pub user: UserIdentity,
}

/// Tokens handed out on refresh.
///
/// The service may keep the refresh token unchanged and leave it out.
#[derive(Clone, PartialEq, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedTokens {
    #[redact]
    pub access_token: String,

    #[serde(default)]
    #[redact]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
}

impl RefreshedTokens {
    /// Completes the pair with the refresh token that was exchanged.
    #[must_use]
    pub fn into_pair(self, previous_refresh_token: String) -> TokenPair {
        TokenPair {
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or(previous_refresh_token),
            expires_in: self.expires_in,
            refresh_expires_in: self.refresh_expires_in,
        }
    }
}

/// Refresh response, either `{ "tokens": { ... } }` or the tokens
/// themselves.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RefreshPayload {
    Wrapped { tokens: RefreshedTokens },
    Bare(RefreshedTokens),
}

impl From<RefreshPayload> for RefreshedTokens {
    fn from(payload: RefreshPayload) -> Self {
        match payload {
            RefreshPayload::Wrapped { tokens } | RefreshPayload::Bare(tokens) => tokens,
        }
    }
}

#[derive(Clone, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[redact]
    pub refresh_token: String,
}

/// Profile changes; absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,
}

#[derive(Clone, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    #[redact]
    pub current_password: String,

    #[redact]
    pub new_password: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ForgotPassword {
    pub email: String,
}

#[derive(Clone, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReset {
    #[redact]
    pub reset_token: String,

    #[redact]
    pub new_password: String,
}

/// Extra profile fields completing a federated sign-up.
#[derive(Clone, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct FederatedRegistration {
    pub name: String,

    pub email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[redact]
    pub password: Option<String>,
}

/// Response of operations that only report back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub user: Option<UserIdentity>,
}
