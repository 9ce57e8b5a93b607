//! Client-side authentication and request plane of the SnipURL console.
//!
//! The crate keeps the console signed in while it talks to the SnipURL
//! service. From the bottom up:
//!
//! * [`tokens`] - Durable storage of the access and refresh token
//! * [`http`] - Authenticated transport with transparent session refresh
//! * [`error`], [`normalize`], [`classify`] - One error shape for every
//!   failure, and its split into form feedback
//! * [`retry`] - Bounded retry with exponential backoff
//! * [`session`] - The authentication state and its operations
//! * [`form`] - Error state and retry budget of a single form
//! * [`gate`] - Route preconditions on the authentication state
//! * [`gateway`] - Typed calls for the rest of the service
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use snipurl::{
//!     config::Config, gateway::Gateway, http::Client, navigation::History,
//!     session::Session, tokens::FileStore,
//! };
//!
//! let config = Config::from_env()?;
//! let store = Arc::new(FileStore::new(token_path));
//! let client = Arc::new(Client::new(&config, store, Arc::new(History::default()))?);
//!
//! let session = Session::new(Arc::clone(&client));
//! session.bootstrap().await?;
//!
//! let gateway = Gateway::new(client, &config);
//! let overview = gateway.overview().await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod classify;
pub mod config;
pub mod error;
pub mod federated;
pub mod form;
pub mod gate;
pub mod gateway;
pub mod http;
pub mod navigation;
pub mod normalize;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod tokens;
