//! Federated sign-in callback.
//!
//! After the identity provider has vouched for the user, the service
//! redirects the console to a callback URL. Its query string says which
//! `action` to take:
//!
//! * `login` - an existing account. Carries a token bundle (`token` or
//!   `accessToken`, `refreshToken`, optional `expiresIn` and
//!   `refreshExpiresIn`) and the identity (`id`, `name`, `email`,
//!   `contactNumber`, `emailVerified`).
//! * `signup` - a new account that needs more profile fields. Carries the
//!   identity only (`name`, `email`, `googleId`).
//!
//! A callback with an `error` parameter reports a failed sign-in.

use std::collections::HashMap;

use url::Url;

use crate::{
    error::{Error, Result},
    protocol::auth::{FederatedRegistration, UserIdentity},
    tokens::TokenPair,
};

/// Parsed callback of federated sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    /// Sign in with the handed back tokens; the identity is in-band.
    Login {
        tokens: TokenPair,
        user: UserIdentity,
    },

    /// Complete the sign-up with extra profile fields.
    Signup(FederatedProfile),
}

/// Identity vouched for by the provider for a new account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FederatedProfile {
    pub name: String,
    pub email: String,
    pub google_id: Option<String>,
}

impl FederatedProfile {
    /// Combines the vouched identity with the fields the user filled in.
    #[must_use]
    pub fn into_registration(
        self,
        contact_number: Option<String>,
        password: Option<String>,
    ) -> FederatedRegistration {
        FederatedRegistration {
            name: self.name,
            email: self.email,
            google_id: self.google_id,
            contact_number,
            password,
        }
    }
}

impl Callback {
    /// Parses the callback URL.
    ///
    /// # Errors
    ///
    /// Will return `Err` with:
    /// * An authentication error if the callback carries `error`
    /// * A validation error if the action is missing or unknown, or required
    ///   parameters are missing or malformed
    pub fn parse(url: &Url) -> Result<Self> {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let param = |key: &str| {
            params
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        if let Some(message) = param("error") {
            warn!("federated sign-in failed: {message}");
            return Err(Error::authentication(message));
        }

        match param("action") {
            Some("login") => {
                let access_token = param("token")
                    .or_else(|| param("accessToken"))
                    .ok_or_else(|| missing("access token"))?;
                let refresh_token = param("refreshToken").ok_or_else(|| missing("refresh token"))?;
                let id = param("id").ok_or_else(|| missing("user id"))?;

                let tokens = TokenPair {
                    expires_in: seconds(param("expiresIn"), "expiresIn")?,
                    refresh_expires_in: seconds(param("refreshExpiresIn"), "refreshExpiresIn")?,
                    ..TokenPair::new(access_token, refresh_token)
                };
                let user = UserIdentity {
                    id: id.to_owned(),
                    name: param("name").unwrap_or_default().to_owned(),
                    email: param("email").unwrap_or_default().to_owned(),
                    contact_number: param("contactNumber").map(ToOwned::to_owned),
                    is_federated: true,
                    email_verified: param("emailVerified") == Some("true"),
                    ..UserIdentity::default()
                };

                debug!("federated sign-in of {}", user.email);
                Ok(Self::Login { tokens, user })
            }

            Some("signup") => {
                let email = param("email").ok_or_else(|| missing("email"))?;
                Ok(Self::Signup(FederatedProfile {
                    name: param("name").unwrap_or_default().to_owned(),
                    email: email.to_owned(),
                    google_id: param("googleId").map(ToOwned::to_owned),
                }))
            }

            Some(action) => Err(Error::validation(format!(
                "unknown federated sign-in action: {action}"
            ))),
            None => Err(Error::validation("federated sign-in callback lacks an action")),
        }
    }
}

fn missing(what: &str) -> Error {
    Error::validation(format!("federated sign-in callback lacks the {what}"))
}

fn seconds(value: Option<&str>, name: &str) -> Result<Option<u64>> {
    value
        .map(|value| {
            value
                .parse()
                .map_err(|e| Error::validation(format!("{name} is not a number of seconds: {e}")))
        })
        .transpose()
}
