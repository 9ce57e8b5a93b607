//! Process-wide authentication state.
//!
//! [`Session`] is the only owner of [`AuthState`]. Everything else observes
//! it through [`Session::state`] or a [`Session::subscribe`] receiver.
//!
//! # State machine
//!
//! ```text
//! Unknown ──bootstrap: token and profile ok──> Authenticated
//! Unknown ──bootstrap: no token or failure───> Anonymous
//! Anonymous ──sign-in or federated sign-in───> Authenticated
//! Authenticated ──sign-out or lost session───> Anonymous
//! ```
//!
//! Token refreshes done by the HTTP client reach the session through
//! [`SessionEvent`]s, so the state always carries the tokens in the store.
//!
//! # Example
//!
//! ```rust
//! let session = Session::new(Arc::clone(&client));
//! session.bootstrap().await?;
//!
//! if !session.is_authenticated() {
//!     let user = session.sign_in(&Credentials::new(email, password)).await?;
//!     info!("welcome, {}", user.name);
//! }
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;
use url::Url;

use crate::{
    error::{Error, Result},
    federated::Callback,
    http::{Client, Request, SessionEvent},
    protocol::auth::{
        self, Acknowledgement, Credentials, FederatedRegistration, ForgotPassword,
        PasswordChange, PasswordReset, ProfileUpdate, RefreshRequest, Registration, SignedIn,
        UserIdentity, UserPayload,
    },
    tokens::{StoredTokens, TokenPair},
};

/// Authentication state of the console.
///
/// Being authenticated, having an identity and having tokens are one and the
/// same state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthState {
    /// Not yet reconciled with the token store.
    #[default]
    Unknown,

    Anonymous,

    Authenticated {
        user: UserIdentity,
        tokens: TokenPair,
    },
}

impl AuthState {
    /// Whether consumers should wait before acting on the state.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserIdentity> {
        match self {
            Self::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> Option<&TokenPair> {
        match self {
            Self::Authenticated { tokens, .. } => Some(tokens),
            _ => None,
        }
    }
}

/// Owner of the authentication state and its operations.
#[derive(Debug)]
pub struct Session {
    client: Arc<Client>,
    state: Arc<watch::Sender<AuthState>>,
    bootstrapped: AtomicBool,
}

impl Session {
    /// Creates a session in the [`AuthState::Unknown`] state and starts
    /// following the session events of `client`.
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        let state = Arc::new(watch::Sender::new(AuthState::Unknown));

        let observed = Arc::clone(&state);
        client.on_session_event(move |event| match event {
            SessionEvent::Refreshed(refreshed) => {
                observed.send_if_modified(|state| match state {
                    AuthState::Authenticated { tokens, .. } => {
                        tokens.clone_from(refreshed);
                        true
                    }
                    _ => false,
                });
            }
            SessionEvent::Expired => {
                observed.send_replace(AuthState::Anonymous);
            }
        });

        Self {
            client,
            state,
            bootstrapped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Returns a receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserIdentity> {
        self.state.borrow().user().cloned()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    /// Reconciles the state with the token store. Only the first call has any
    /// effect.
    ///
    /// Without an access token the session becomes anonymous. Otherwise the
    /// profile is fetched, which refreshes the session first if the access
    /// token is stale.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the profile could not be fetched. The session is
    /// then signed out locally. The state never stays
    /// [`AuthState::Unknown`].
    pub async fn bootstrap(&self) -> Result<()> {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            trace!("session already bootstrapped");
            return Ok(());
        }

        match self.restore().await {
            Ok(state) => {
                match state.user() {
                    Some(user) => info!("restored session of {}", user.email),
                    None => debug!("no session to restore"),
                }
                self.state.send_replace(state);
                Ok(())
            }
            Err(e) => {
                warn!("cannot restore session: {e}");
                self.clear_local();
                Err(e)
            }
        }
    }

    async fn restore(&self) -> Result<AuthState> {
        if self.client.tokens().access_token()?.is_none() {
            return Ok(AuthState::Anonymous);
        }

        let user = self.profile().await?;

        // Read back after the profile request, which may have refreshed.
        Ok(match self.client.tokens().read()? {
            Some(tokens) => AuthState::Authenticated { user, tokens },
            None => AuthState::Anonymous,
        })
    }

    /// Fetches the identity of the signed-in user.
    pub async fn profile(&self) -> Result<UserIdentity> {
        self.client
            .get::<UserPayload>(auth::PROFILE)
            .await
            .map(Into::into)
    }

    /// Signs in with an email address and password.
    ///
    /// # Errors
    ///
    /// Will return `Err` with the service's error if the credentials are
    /// rejected. The state is left untouched.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity> {
        debug!("signing in as {}", credentials.email);
        let request = Request::post(auth::LOGIN).json(credentials)?.anonymous();
        let signed_in: SignedIn = self.client.send(request).await?.data()?;

        self.adopt(signed_in.tokens, signed_in.user.clone())?;
        Ok(signed_in.user)
    }

    /// Creates an account. Does not sign in.
    ///
    /// # Errors
    ///
    /// Will return `Err` with the complete service error, so that conflicts
    /// can be attributed to the offending input.
    pub async fn register(&self, registration: &Registration) -> Result<Acknowledgement> {
        debug!("registering {}", registration.email);
        let request = Request::post(auth::REGISTER)
            .json(registration)?
            .anonymous();
        self.client.send(request).await?.data()
    }

    /// Signs out. Never fails.
    ///
    /// The session is cleared locally first. The service is notified in the
    /// background, and failing to do so is only logged.
    pub fn sign_out(&self) {
        let StoredTokens {
            token,
            refresh_token,
        } = self
            .client
            .tokens()
            .load()
            .inspect_err(|e| warn!("cannot read tokens to sign out: {e}"))
            .unwrap_or_default();

        self.clear_local();
        info!("signed out");

        let Some(access_token) = token else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime to notify the service of sign-out");
            return;
        };

        let client = Arc::clone(&self.client);
        runtime.spawn(async move {
            let request = match refresh_token {
                Some(refresh_token) => {
                    Request::post(auth::LOGOUT).json(&RefreshRequest { refresh_token })
                }
                None => Ok(Request::post(auth::LOGOUT)),
            };

            let result = match request {
                Ok(request) => client.send(request.bearer(access_token)).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!("service was not notified of sign-out: {e}");
            }
        });
    }

    /// Updates the profile and merges the returned identity into the state.
    ///
    /// Returns the merged identity, or the returned one when not signed in.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserIdentity> {
        let mut user: UserIdentity = self
            .client
            .put::<_, UserPayload>(auth::PROFILE, update)
            .await?
            .into();

        self.state.send_if_modified(|state| match state {
            AuthState::Authenticated { user: current, .. } => {
                current.merge(user.clone());
                user.clone_from(current);
                true
            }
            _ => false,
        });

        Ok(user)
    }

    pub async fn change_password(&self, change: &PasswordChange) -> Result<Acknowledgement> {
        self.client.post(auth::CHANGE_PASSWORD, change).await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Acknowledgement> {
        let request = Request::post(auth::FORGOT_PASSWORD)
            .json(&ForgotPassword {
                email: email.to_owned(),
            })?
            .anonymous();
        self.client.send(request).await?.data()
    }

    pub async fn reset_password(&self, reset: &PasswordReset) -> Result<Acknowledgement> {
        let request = Request::post(auth::RESET_PASSWORD)
            .json(reset)?
            .anonymous();
        self.client.send(request).await?.data()
    }

    /// Adopts tokens and identity handed back by federated sign-in. In state
    /// terms this is the same as [`Session::sign_in`] succeeding.
    pub fn complete_federated_sign_in(&self, tokens: TokenPair, user: UserIdentity) -> Result<()> {
        self.adopt(tokens, user)
    }

    /// Handles the callback URL of federated sign-in.
    ///
    /// A login callback signs in and navigates to the landing view, without
    /// fetching the profile. A signup callback is returned as is, to be
    /// completed with [`Session::complete_federated_registration`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if the callback reports an error or is malformed.
    pub fn handle_federated_callback(&self, url: &Url) -> Result<Callback> {
        let callback = Callback::parse(url)?;

        if let Callback::Login { tokens, user } = &callback {
            self.adopt(tokens.clone(), user.clone())?;
            self.client
                .navigator()
                .navigate(&self.client.routes().landing);
        }

        Ok(callback)
    }

    /// Completes a federated sign-up with the extra profile fields and signs
    /// in.
    pub async fn complete_federated_registration(
        &self,
        registration: &FederatedRegistration,
    ) -> Result<UserIdentity> {
        let request = Request::post(auth::GOOGLE_OAUTH_COMPLETE)
            .json(registration)?
            .anonymous();
        let signed_in: SignedIn = self.client.send(request).await?.data()?;

        self.adopt(signed_in.tokens, signed_in.user.clone())?;
        Ok(signed_in.user)
    }

    /// Entry point of federated sign-in, to open in the user agent.
    pub fn federated_sign_in_url(&self) -> Result<Url> {
        self.client.url(auth::GOOGLE)
    }

    /// Refreshes the session now.
    ///
    /// # Errors
    ///
    /// Will return `Err` if not signed in, or if the refresh fails, in which
    /// case the session is signed out.
    pub async fn refresh_now(&self) -> Result<()> {
        if !self.is_authenticated() {
            return Err(Error::authentication("not signed in"));
        }

        self.client.refresh_session().await.map(|_| ())
    }

    /// Writes the tokens, then publishes the authenticated state.
    fn adopt(&self, tokens: TokenPair, user: UserIdentity) -> Result<()> {
        self.client.replace_session(Some(&tokens))?;
        info!("signed in as {}", user.email);
        self.state
            .send_replace(AuthState::Authenticated { user, tokens });
        Ok(())
    }

    fn clear_local(&self) {
        if let Err(e) = self.client.replace_session(None) {
            error!("cannot clear tokens: {e}");
        }
        self.state.send_replace(AuthState::Anonymous);
    }
}
