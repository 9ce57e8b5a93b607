//! Authenticated HTTP client for the SnipURL service.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Bearer token injection from the [`TokenStore`]
//! * Transparent session refresh when the service answers 401
//! * A single in-flight refresh shared by all concurrent requests
//! * Normalization of every failure into a structured [`struct@Error`]
//! * Request rate limiting and consistent timeouts and headers
//!
//! # Session Refresh
//!
//! When a request is rejected with 401 Unauthorized, the client exchanges
//! the refresh token for a new token pair and re-sends the request once.
//! Requests that are rejected while a refresh is already running wait in a
//! FIFO queue and resume with the refreshed access token, or fail with the
//! refresh error. If the session cannot be refreshed, the tokens are cleared
//! and the console navigates to the sign-in view.
//!
//! Rate-limited requests (429) never trigger a refresh.
//!
//! # Example
//!
//! ```rust
//! use snipurl::http::{Client, Request};
//!
//! let client = Client::new(&config, store, navigator)?;
//!
//! let response = client.send(Request::get("/api/urls")).await?;
//! let page: UrlPage = response.data()?;
//! ```

use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    num::NonZeroU32,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{Error, ErrorKind, Result},
    navigation::{self, Navigator, Routes},
    normalize,
    protocol::{
        self,
        auth::{self, RefreshPayload, RefreshRequest, RefreshedTokens},
        Envelope,
    },
    tokens::{TokenPair, TokenStore},
};

/// Session changes made by the client on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The token pair was replaced by a refresh.
    Refreshed(TokenPair),

    /// The session could not be recovered and the tokens were cleared.
    Expired,
}

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// Continuation of a request waiting on the in-flight refresh.
type Waiter = oneshot::Sender<Result<String>>;

/// Refresh bookkeeping. `waiters` is only non-empty while `refreshing`.
#[derive(Debug, Default)]
struct RefreshState {
    refreshing: bool,
    waiters: VecDeque<Waiter>,

    /// Bumped whenever the session is replaced or cleared; a refresh started
    /// under an older generation must not write its tokens.
    generation: u64,
}

/// A request to the service.
///
/// Bodies are serialized up front so the request can be re-sent after a
/// refresh.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    headers: HeaderMap,

    /// Sent without the stored access token and exempt from refresh.
    anonymous: bool,

    /// Explicit access token, overriding the stored one.
    bearer: Option<String>,

    /// Whether this request was already re-sent after a 401.
    retried: bool,

    /// Correlates log lines of one logical request.
    id: Uuid,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            anonymous: false,
            bearer: None,
            retried: false,
            id: Uuid::new_v4(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets a JSON body.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `body` cannot be serialized.
    pub fn json<T>(mut self, body: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    /// Appends the fields of `query` to the query string. `null` fields are
    /// left out.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `query` does not serialize into a flat object.
    pub fn query<T>(mut self, query: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let serde_json::Value::Object(fields) = serde_json::to_value(query)? else {
            return Err(Error::validation("query parameters must be an object"));
        };

        for (key, value) in fields {
            let value = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(value) => value,
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.to_string(),
                _ => {
                    return Err(Error::validation(format!(
                        "query parameter {key} is not a scalar"
                    )))
                }
            };
            self.query.push((key, value));
        }

        Ok(self)
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `value` is not a valid header value.
    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sends the request without credentials and outside of the refresh
    /// protocol, so that 401 responses surface as they are.
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Authenticates with an explicit access token instead of the stored
    /// one. Such requests are not refreshed.
    #[must_use]
    pub fn bearer(mut self, access_token: impl Into<String>) -> Self {
        self.bearer = Some(access_token.into());
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn origin(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// A successful response with its body read into memory.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    body: Vec<u8>,
    origin: String,
}

impl Response {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parses the body as `T`. An empty body parses as `null`.
    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        protocol::json(&self.body, &self.origin)
    }

    /// Parses the payload of the success envelope, whether it is wrapped in
    /// `data` or not.
    pub fn data<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        self.json::<Envelope<T>>().map(Envelope::into_inner)
    }
}

/// HTTP client with session maintenance.
pub struct Client {
    http: reqwest::Client,

    /// Base of every request path; always ends with a slash.
    api_base: Url,

    /// Rate limiter to not flood the service.
    rate_limiter: DefaultDirectRateLimiter,

    tokens: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    routes: Routes,

    refresh: Mutex<RefreshState>,
    listeners: RwLock<Vec<Listener>>,
}

impl Client {
    /// Rolling window of the client-side rate limit.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Calls allowed per window. Requests beyond it are delayed.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `config` - Service location, timeout and user agent
    /// * `tokens` - Store holding the session tokens
    /// * `navigator` - Used to send the user to sign-in when the session is
    ///   lost
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * HTTP client creation fails
    /// * The rate limit parameters are zero
    pub fn new(
        config: &Config,
        tokens: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, Self::JSON_CONTENT);

        let http = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()?;

        // `Url::join` replaces the last path segment unless the base ends
        // with a slash.
        let mut api_base = config.api_base.clone();
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| Error::internal("quota time interval is zero"))?
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .ok_or_else(|| Error::internal("calls per interval is zero"))?,
            );

        Ok(Self {
            http,
            api_base,
            rate_limiter: governor::RateLimiter::direct(quota),
            tokens,
            navigator,
            routes: config.routes.clone(),
            refresh: Mutex::new(RefreshState::default()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    #[must_use]
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    #[must_use]
    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    /// Resolves a service path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .map_err(Into::into)
    }

    /// Registers an observer of session changes made by the client.
    pub fn on_session_event<F>(&self, listener: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(Box::new(listener)),
            Err(e) => error!("cannot register session listener: {e}"),
        }
    }

    fn notify(&self, event: &SessionEvent) {
        match self.listeners.read() {
            Ok(listeners) => listeners.iter().for_each(|listener| listener(event)),
            Err(e) => error!("cannot notify session listeners: {e}"),
        }
    }

    /// Performs a request with the given parts.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails, see [`Client::send`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        headers: Option<HeaderMap>,
    ) -> Result<Response> {
        let mut request = Request::new(method, path);
        if let Some(body) = body {
            request = request.json(&body)?;
        }
        if let Some(headers) = headers {
            request = request.headers(headers);
        }

        self.send(request).await
    }

    /// GETs `path` and parses the payload.
    pub async fn get<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        self.send(Request::get(path)).await?.data()
    }

    /// POSTs `body` to `path` and parses the payload.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + fmt::Debug,
    {
        self.send(Request::post(path).json(body)?).await?.data()
    }

    /// PUTs `body` to `path` and parses the payload.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + fmt::Debug,
    {
        self.send(Request::put(path).json(body)?).await?.data()
    }

    /// DELETEs `path`.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(Request::delete(path)).await.map(|_| ())
    }

    /// Sends a request, maintaining the session along the way.
    ///
    /// # Errors
    ///
    /// Returns the normalized error when:
    /// * The service answers with a non-2xx status
    /// * The service cannot be reached or does not answer in time
    /// * The session expired and could not be refreshed
    pub async fn send(&self, mut request: Request) -> Result<Response> {
        let origin = request.origin();
        let mut bearer = self.bearer_for(&request)?;

        loop {
            let response = self
                .execute(self.build(&request, bearer.as_deref())?)
                .await
                .inspect_err(|e| debug!("{origin} [{}]: {e}", request.id))?;

            let status = response.status();
            trace!("{origin} [{}]: {status}", request.id);

            if status.is_success() {
                let body = response.bytes().await?;
                return Ok(Response {
                    status,
                    body: body.to_vec(),
                    origin,
                });
            }

            if status != StatusCode::UNAUTHORIZED || request.anonymous || request.bearer.is_some()
            {
                return Err(normalize::from_response(response).await);
            }

            if request.retried {
                let error = normalize::from_response(response).await;
                warn!("{origin} [{}]: still unauthorized after refresh", request.id);
                self.expire_session();
                return Err(Error {
                    kind: ErrorKind::Authentication,
                    ..error
                });
            }
            request.retried = true;

            // Another request, or another console sharing the store, may
            // have refreshed the session since this one was sent.
            let current = self.tokens.access_token()?;
            if current.is_some() && current != bearer {
                debug!("{origin} [{}]: retrying with newer access token", request.id);
                bearer = current;
                continue;
            }

            bearer = Some(self.refreshed_access_token().await?);
            debug!("{origin} [{}]: retrying with refreshed access token", request.id);
        }
    }

    /// Replaces the stored tokens, or clears them with `None`.
    ///
    /// A refresh in flight is discarded: it will not write its tokens and the
    /// requests waiting on it fail.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the token store cannot be written.
    pub fn replace_session(&self, tokens: Option<&TokenPair>) -> Result<()> {
        let mut state = self.refresh.lock()?;
        state.generation = state.generation.wrapping_add(1);

        match tokens {
            Some(tokens) => self.tokens.write(tokens),
            None => self.tokens.clear(),
        }
    }

    /// Refreshes the session now, sharing any refresh already in flight.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the session could not be refreshed. In that case
    /// the tokens are cleared and the console navigates to sign-in.
    pub async fn refresh_session(&self) -> Result<String> {
        self.refreshed_access_token().await
    }

    fn bearer_for(&self, request: &Request) -> Result<Option<String>> {
        if let Some(token) = &request.bearer {
            return Ok(Some(token.clone()));
        }
        if request.anonymous {
            return Ok(None);
        }
        self.tokens.access_token()
    }

    fn build(&self, request: &Request, bearer: Option<&str>) -> Result<reqwest::Request> {
        let url = self.url(&request.path)?;

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(request.headers.clone())
            .header(Self::REQUEST_ID, request.id.to_string());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        if let Some(ref body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, Self::JSON_CONTENT)
                .body(body.clone());
        }

        builder.build().map_err(Into::into)
    }

    /// Executes a request with rate limiting.
    fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.http.execute(request).map_err(Into::into))
    }

    /// Returns a fresh access token, refreshing the session or waiting for
    /// the refresh in flight.
    async fn refreshed_access_token(&self) -> Result<String> {
        let (waiter, generation) = {
            let mut state = self.refresh.lock()?;
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                (Some(rx), state.generation)
            } else {
                state.refreshing = true;
                (None, state.generation)
            }
        };

        if let Some(waiter) = waiter {
            trace!("waiting for session refresh in flight");
            return waiter.await.unwrap_or_else(|_| {
                Err(Error::authentication("session refresh was abandoned")
                    .with_status(StatusCode::UNAUTHORIZED))
            });
        }

        let guard = RefreshGuard::new(&self.refresh);
        let outcome = self.exchange_refresh_token(generation).await;
        if let Err(ref e) = outcome {
            // A session replaced meanwhile is not ours to expire.
            if self.is_current(generation) {
                warn!("session refresh failed: {e}");
                self.expire_session();
            } else {
                debug!("session refresh superseded: {e}");
            }
        }

        guard.complete(
            outcome
                .as_ref()
                .map(|tokens| tokens.access_token.clone())
                .map_err(Error::clone),
        );

        outcome.map(|tokens| tokens.access_token)
    }

    /// Exchanges the stored refresh token for a new token pair.
    ///
    /// The refresh request bypasses the refresh protocol itself. The new pair
    /// is only written if the session is still the one of `generation`.
    async fn exchange_refresh_token(&self, generation: u64) -> Result<TokenPair> {
        let Some(refresh_token) = self.tokens.refresh_token()? else {
            return Err(Error::authentication("session expired, please sign in again")
                .with_status(StatusCode::UNAUTHORIZED));
        };

        debug!("refreshing session");
        let request = Request::post(auth::REFRESH_TOKEN)
            .json(&RefreshRequest {
                refresh_token: refresh_token.clone(),
            })?
            .anonymous();

        let response = self.execute(self.build(&request, None)?).await?;
        if !response.status().is_success() {
            return Err(normalize::from_response(response).await);
        }

        let body = response.bytes().await?;
        let payload = protocol::json::<Envelope<RefreshPayload>>(&body, auth::REFRESH_TOKEN)?;
        let tokens = RefreshedTokens::from(payload.into_inner()).into_pair(refresh_token);

        {
            let state = self.refresh.lock()?;
            if state.generation != generation {
                return Err(Error::authentication("session ended during refresh")
                    .with_status(StatusCode::UNAUTHORIZED));
            }
            self.tokens.write(&tokens)?;
        }

        self.notify(&SessionEvent::Refreshed(tokens.clone()));
        info!("session refreshed");

        Ok(tokens)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
            == generation
    }

    /// Clears the tokens and sends the user to sign-in.
    fn expire_session(&self) {
        if let Err(e) = self.replace_session(None) {
            error!("cannot clear tokens: {e}");
        }
        self.notify(&SessionEvent::Expired);
        self.redirect_to_sign_in();
    }

    /// Navigates to sign-in, unless already there.
    fn redirect_to_sign_in(&self) {
        let current = self.navigator.current_path();
        if navigation::path_only(&current) == self.routes.sign_in {
            trace!("already at {}", self.routes.sign_in);
            return;
        }

        info!("session expired, redirecting to {}", self.routes.sign_in);
        self.navigator.navigate(&self.routes.sign_in);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("api_base", &self.api_base.as_str())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

/// Ends a refresh: resets `refreshing` and drains the waiters exactly once,
/// also when the refreshing future is dropped halfway.
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    completed: bool,
}

impl<'a> RefreshGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        Self {
            state,
            completed: false,
        }
    }

    fn complete(mut self, outcome: Result<String>) {
        self.completed = true;

        let waiters = self.drain();
        if !waiters.is_empty() {
            debug!("resuming {} requests waiting on refresh", waiters.len());
        }

        for waiter in waiters {
            // The receiver is gone when its request was dropped.
            let _ = waiter.send(outcome.clone());
        }
    }

    fn drain(&self) -> VecDeque<Waiter> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refreshing = false;
        std::mem::take(&mut state.waiters)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            // Dropping the senders fails every waiter.
            drop(self.drain());
        }
    }
}
