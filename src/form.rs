//! Error state of a single form.
//!
//! [`FormErrors`] turns normalized errors into messages under the offending
//! inputs and a form-level message, and keeps the retry budget of the form.
//! Messages are never empty: setting an empty message removes the entry.
//!
//! # Example
//!
//! ```rust
//! let form = FormErrors::new(config.form_max_retries);
//!
//! match form.submit_and_apply(|| session.register(&registration)).await {
//!     Ok(_) => navigator.navigate(&routes.sign_in),
//!     Err(SubmitError::Failed(e)) if form.can_retry(&e) => show_retry(),
//!     Err(_) => {}
//! }
//!
//! let email_error = form.field("email");
//! ```

use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use thiserror::Error;

use crate::{
    classify::{self, Categorized},
    config::Config,
    error::Error,
};

/// Why a submission did not succeed.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SubmitError {
    #[error("form is already being submitted")]
    InFlight,

    #[error("gave up after {0} retries")]
    RetriesExhausted(u32),

    /// The submission failed and its error was applied to the form.
    #[error(transparent)]
    Failed(#[from] Error),
}

#[derive(Debug, Default)]
struct State {
    fields: BTreeMap<String, String>,
    general: Option<String>,
    retry_count: u32,
}

/// Error messages, retry budget and submission gate of one form.
#[derive(Debug)]
pub struct FormErrors {
    state: Mutex<State>,
    max_retries: u32,
    submitting: AtomicBool,
}

impl FormErrors {
    /// Creates an empty form state. The budget is at least one retry.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::default(),
            max_retries: max_retries.max(1),
            submitting: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.form_max_retries)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear_all(&self) {
        let mut state = self.state();
        state.fields.clear();
        state.general = None;
    }

    pub fn clear_field(&self, name: &str) {
        self.state().fields.remove(name);
    }

    pub fn clear_general(&self) {
        self.state().general = None;
    }

    /// Sets the message of an input, or removes it if `message` is blank.
    pub fn set_field(&self, name: &str, message: &str) {
        let mut state = self.state();
        Self::put_field(&mut state, name, message);
    }

    pub fn set_fields<I, K, V>(&self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut state = self.state();
        for (name, message) in fields {
            Self::put_field(&mut state, name.as_ref(), message.as_ref());
        }
    }

    /// Sets the form-level message, or removes it if `message` is blank.
    pub fn set_general(&self, message: &str) {
        let message = message.trim();
        self.state().general = (!message.is_empty()).then(|| message.to_owned());
    }

    fn put_field(state: &mut State, name: &str, message: &str) {
        let message = message.trim();
        if message.is_empty() {
            state.fields.remove(name);
        } else {
            state.fields.insert(name.to_owned(), message.to_owned());
        }
    }

    /// Shows a service error on the form.
    ///
    /// Field errors go under their inputs and anything else becomes the
    /// form-level message. An error that yields neither is shown by its
    /// message.
    pub fn apply_backend_error(&self, error: &Error) {
        let Categorized {
            field_errors,
            general_error,
        } = classify::categorize(error);

        let mut state = self.state();
        let mut applied = false;

        for (name, message) in &field_errors {
            Self::put_field(&mut state, name, message);
            applied |= state.fields.contains_key(name);
        }

        if let Some(message) = general_error.as_deref().map(str::trim) {
            if !message.is_empty() {
                state.general = Some(message.to_owned());
                applied = true;
            }
        }

        if !applied {
            let message = error.message.trim();
            state.general = Some(if message.is_empty() {
                error.kind.default_message().to_owned()
            } else {
                message.to_owned()
            });
        }
    }

    /// Clears the errors, runs `submit` and shows its error, if any.
    ///
    /// A successful submission restores the retry budget.
    ///
    /// # Errors
    ///
    /// Will return `Err` if another submission is in flight, or with the
    /// error of `submit`.
    pub async fn submit_and_apply<T, F, Fut>(&self, submit: F) -> Result<T, SubmitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let submitting = self.begin()?;
        self.run(submitting, submit).await
    }

    /// Submits again, within the retry budget.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the budget is spent, another submission is in
    /// flight, or with the error of `submit`.
    pub async fn retry<T, F, Fut>(&self, submit: F) -> Result<T, SubmitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        // The flag is claimed before any budget is spent.
        let submitting = self.begin()?;

        {
            let mut state = self.state();
            if state.retry_count >= self.max_retries {
                return Err(SubmitError::RetriesExhausted(self.max_retries));
            }
            state.retry_count += 1;
            debug!("retry {}/{}", state.retry_count, self.max_retries);
        }

        self.run(submitting, submit).await
    }

    fn begin(&self) -> Result<Submitting<'_>, SubmitError> {
        if self
            .submitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("ignoring submission while another is in flight");
            return Err(SubmitError::InFlight);
        }
        Ok(Submitting(&self.submitting))
    }

    async fn run<T, F, Fut>(&self, _submitting: Submitting<'_>, submit: F) -> Result<T, SubmitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        self.clear_all();
        match submit().await {
            Ok(value) => {
                self.reset_retries();
                Ok(value)
            }
            Err(e) => {
                debug!("submission failed: {e}");
                self.apply_backend_error(&e);
                Err(e.into())
            }
        }
    }

    /// Restores the retry budget, for when the user changed the form.
    pub fn reset_retries(&self) {
        self.state().retry_count = 0;
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        self.state().fields.get(name).cloned()
    }

    #[must_use]
    pub fn general(&self) -> Option<String> {
        self.state().general.clone()
    }

    /// Returns a snapshot of all messages.
    #[must_use]
    pub fn errors(&self) -> Categorized {
        let state = self.state();
        Categorized {
            field_errors: state.fields.clone(),
            general_error: state.general.clone(),
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        let state = self.state();
        !state.fields.is_empty() || state.general.is_some()
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.state().retry_count
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether to offer retrying after `error`.
    #[must_use]
    pub fn can_retry(&self, error: &Error) -> bool {
        classify::is_retryable(error) && self.retry_count() < self.max_retries
    }

    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::Acquire)
    }
}

impl Default for FormErrors {
    fn default() -> Self {
        Self::new(Config::DEFAULT_FORM_MAX_RETRIES)
    }
}

/// Lowers the submission flag, also when the submission is dropped.
struct Submitting<'a>(&'a AtomicBool);

impl Drop for Submitting<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
