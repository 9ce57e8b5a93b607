//! Console navigation.
//!
//! The transport needs to send the user to the sign-in view when the session
//! can no longer be recovered, and the federated callback needs to continue to
//! the landing view. Both only need the current path and a way to move
//! elsewhere, which is what [`Navigator`] provides.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Well-known console paths.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Routes {
    /// Sign-in view, target of every forced sign-out
    pub sign_in: String,

    /// Where authenticated users land
    pub landing: String,

    /// Target of the catch-all route
    pub root: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            sign_in: "/login".to_owned(),
            landing: "/dashboard".to_owned(),
            root: "/".to_owned(),
        }
    }
}

/// Access to the console's location.
pub trait Navigator: Send + Sync {
    /// Path of the current view, possibly with a query string.
    fn current_path(&self) -> String;

    /// Moves to another view.
    fn navigate(&self, path: &str);
}

/// Strips the query string and fragment from a path.
#[must_use]
pub fn path_only(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or_default()
}

/// In-memory navigation history.
#[derive(Debug)]
pub struct History {
    entries: Mutex<Vec<String>>,
}

impl History {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(vec![initial.into()]),
        }
    }

    /// All visited paths, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for History {
    fn current_path(&self) -> String {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.last().cloned())
            .unwrap_or_default()
    }

    fn navigate(&self, path: &str) {
        debug!("navigating to {path}");
        match self.entries.lock() {
            Ok(mut entries) => entries.push(path.to_owned()),
            Err(e) => error!("navigation history unavailable: {e}"),
        }
    }
}
