//! Tab-local management of short-lived access tokens
//!
//! This library keeps a client's bearer token usable without every caller
//! having to think about expiry. A single [`TokenStore`] per tab caches the
//! current token, decides locally whether it is still fresh by reading its
//! `exp` and `iat` claims, and renews it in the background shortly before it
//! expires. Callers that arrive while a refresh is already outstanding attach
//! to it rather than starting another, so the session endpoint sees at most
//! one refresh at a time.
//!
//! The store never talks to the identity provider. It calls two server-side
//! operations through a [`TokenRemote`][remote::TokenRemote]: one that reads
//! the token already associated with the session, and one that forces the
//! server to mint a new token.
//!
//! # General Flow
//!
//! On page load, build the store with a remote and, when the server handed
//! over the first token in the bootstrap cookie, the cookie jar holding it.
//! The cookie is consumed and deleted immediately. UI code then mounts an
//! [`AccessTokenBinding`] for whoever is signed in and reads tokens through
//! it.
//!
//! ```
//! use std::sync::Arc;
//!
//! use authkit_tokens::{
//!     cookie::{InMemoryCookieJar, BOOTSTRAP_COOKIE_NAME},
//!     remote::StaticTokenRemote,
//!     AccessTokenBinding, Identity, SessionId, TokenStore, UserId,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let jar = Arc::new(InMemoryCookieJar::with_cookie(
//!     BOOTSTRAP_COOKIE_NAME,
//!     "bootstrap-token",
//! ));
//!
//! let store = TokenStore::builder(StaticTokenRemote::new("renewed-token"))
//!     .with_cookie_jar(jar)
//!     .build();
//!
//! let binding = AccessTokenBinding::mount(
//!     store,
//!     Identity::authenticated(
//!         UserId::from_static("user_01"),
//!         SessionId::from_static("session_01"),
//!     ),
//! );
//!
//! let token = binding.get_access_token().await?;
//! assert_eq!(token.as_ref().map(|t| t.as_str()), Some("bootstrap-token"));
//!
//! tracing::info!(
//!     token = format_args!("{:#?}", token),
//!     "access token ready"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `http`: Provides an implementation of [TokenRemote][remote::TokenRemote] that calls the
//!   token server functions over HTTP using [reqwest].
//! * `rand`: Provides for an implementation of [JitterSource][jitter::JitterSource] based on the
//!   random number generator provided by the [rand] crate.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod binding;
mod braids;
pub mod cookie;
pub mod error;
pub mod expiry;
pub mod jitter;
pub mod jwt;
pub mod remote;
mod store;
#[cfg(test)]
mod test_support;

pub use binding::{AccessTokenBinding, BindingState, Identity, WakeEvent};
pub use braids::*;
pub use expiry::{ExpiryPolicy, TokenInfo, TokenStatus};
pub use store::{StoreConfig, Subscription, TokenState, TokenStore, TokenStoreBuilder};
