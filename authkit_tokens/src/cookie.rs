//! The single-use bootstrap cookie
//!
//! On the initial page load the server may hand the client its first access
//! token through a short-lived, script-readable cookie. The client adopts the
//! token and deletes the cookie immediately so that it never lingers as a
//! readable artifact.

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use crate::AccessToken;

/// The default name of the bootstrap cookie
pub const BOOTSTRAP_COOKIE_NAME: &str = "authkit-access-token";

/// Access to the cookies visible to the client
///
/// Mirrors the shape of `document.cookie`: reads look up a single cookie by
/// name, and writes take a full `name=value; attribute…` assignment string.
pub trait CookieJar: Send + Sync {
    /// Gets the value of the named cookie, if set
    fn get(&self, name: &str) -> Option<String>;

    /// Applies a cookie assignment string
    fn set(&self, cookie: &str);
}

/// Builds the assignment string that deletes the named cookie
///
/// The cookie is tombstoned with `Max-Age=0`, `SameSite=Lax`, and `Secure`
/// when the page was served over a secure transport.
pub fn tombstone(name: &str, secure: bool) -> String {
    let mut cookie = format!("{name}=; Path=/; Max-Age=0; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Reads the bootstrap token from the jar and deletes the cookie
///
/// The cookie is tombstoned whether or not it held a usable value. Empty
/// values are treated as absent.
pub fn take_bootstrap_token(jar: &dyn CookieJar, name: &str, secure: bool) -> Option<AccessToken> {
    let value = jar.get(name)?;
    jar.set(&tombstone(name, secure));

    let value = value.trim();
    if value.is_empty() {
        tracing::debug!(cookie = name, "bootstrap cookie was empty");
        None
    } else {
        tracing::debug!(cookie = name, "consumed bootstrap cookie");
        Some(AccessToken::new(value.to_owned()))
    }
}

/// An in-memory cookie jar
///
/// Applies assignments the way a browser would for a single path: a
/// `Max-Age` of zero or less removes the cookie. Every assignment written is
/// also recorded for inspection.
#[derive(Debug, Default)]
pub struct InMemoryCookieJar {
    inner: Mutex<JarState>,
}

#[derive(Debug, Default)]
struct JarState {
    cookies: BTreeMap<String, String>,
    writes: Vec<String>,
}

impl InMemoryCookieJar {
    /// Constructs an empty jar
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a jar holding a single cookie
    pub fn with_cookie(name: impl Into<String>, value: impl Into<String>) -> Self {
        let jar = Self::new();
        jar.lock().cookies.insert(name.into(), value.into());
        jar
    }

    /// The assignment strings written to this jar, in order
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JarState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CookieJar for InMemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.lock().cookies.get(name).cloned()
    }

    fn set(&self, cookie: &str) {
        let mut parts = cookie.split(';').map(str::trim);
        let (name, value) = match parts.next().and_then(|p| p.split_once('=')) {
            Some((name, value)) if !name.trim().is_empty() => (name.trim(), value.trim()),
            _ => {
                tracing::trace!("ignoring malformed cookie assignment");
                return;
            }
        };

        let expired = parts
            .filter_map(|attr| attr.split_once('='))
            .any(|(k, v)| {
                k.trim().eq_ignore_ascii_case("max-age")
                    && v.trim().parse::<i64>().is_ok_and(|age| age <= 0)
            });

        let mut state = self.lock();
        state.writes.push(cookie.to_owned());
        if expired {
            state.cookies.remove(name);
        } else {
            state.cookies.insert(name.to_owned(), value.to_owned());
        }
    }
}
