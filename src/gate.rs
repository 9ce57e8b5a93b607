//! Route preconditions.
//!
//! Gates decide from the [`AuthState`] alone whether a view may render. They
//! never look at the tokens.

use crate::{
    navigation::{self, Routes},
    session::AuthState,
};

/// Precondition of a view.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Gate {
    /// Requires an authenticated session; others go to sign-in.
    Protected,

    /// Requires an anonymous session; others go to the landing view.
    AnonymousOnly,
}

/// Outcome of evaluating a gate.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Decision {
    /// The session is not known yet; show a spinner.
    Pending,

    /// Navigate elsewhere instead.
    Redirect(String),

    Render,
}

impl Gate {
    #[must_use]
    pub fn evaluate(self, state: &AuthState, routes: &Routes) -> Decision {
        if state.is_loading() {
            return Decision::Pending;
        }

        match (self, state.is_authenticated()) {
            (Self::Protected, false) => Decision::Redirect(routes.sign_in.clone()),
            (Self::AnonymousOnly, true) => Decision::Redirect(routes.landing.clone()),
            _ => Decision::Render,
        }
    }
}

/// Console routes and their gates.
///
/// Patterns match whole path segments; a segment starting with `:` matches
/// any single segment, so `/urls/:id` matches `/urls/u1`. Paths without a
/// matching route redirect to the root view.
#[derive(Clone, Debug)]
pub struct RouteTable {
    routes: Routes,
    entries: Vec<(String, Option<Gate>)>,
}

impl RouteTable {
    /// Creates a table with the well-known views: the root is open, sign-in
    /// is anonymous-only and the landing view is protected.
    #[must_use]
    pub fn new(routes: Routes) -> Self {
        let entries = vec![
            (routes.root.clone(), None),
            (routes.sign_in.clone(), Some(Gate::AnonymousOnly)),
            (routes.landing.clone(), Some(Gate::Protected)),
        ];
        Self { routes, entries }
    }

    #[must_use]
    pub fn protected(self, pattern: &str) -> Self {
        self.route(pattern, Some(Gate::Protected))
    }

    #[must_use]
    pub fn anonymous_only(self, pattern: &str) -> Self {
        self.route(pattern, Some(Gate::AnonymousOnly))
    }

    /// Adds a view that renders regardless of the session.
    #[must_use]
    pub fn public(self, pattern: &str) -> Self {
        self.route(pattern, None)
    }

    fn route(mut self, pattern: &str, gate: Option<Gate>) -> Self {
        self.entries.retain(|(existing, _)| existing != pattern);
        self.entries.push((pattern.to_owned(), gate));
        self
    }

    /// Decides what to do when the console is at `path`. Query strings and
    /// fragments are ignored.
    #[must_use]
    pub fn decide(&self, path: &str, state: &AuthState) -> Decision {
        let path = navigation::path_only(path);

        match self
            .entries
            .iter()
            .find(|(pattern, _)| matches(pattern, path))
        {
            Some((_, Some(gate))) => gate.evaluate(state, &self.routes),
            Some((_, None)) => Decision::Render,
            None => {
                trace!("no route for {path}");
                Decision::Redirect(self.routes.root.clone())
            }
        }
    }
}

fn matches(pattern: &str, path: &str) -> bool {
    let segments = |path: &str| {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>()
    };
    let (pattern, path) = (segments(pattern), segments(path));

    pattern.len() == path.len()
        && pattern
            .iter()
            .zip(&path)
            .all(|(expected, actual)| expected.starts_with(':') || expected == actual)
}
