//! Errors reported by the token store and its collaborators

use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// A boxed error as returned by a [`TokenRemote`][crate::remote::TokenRemote]
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An error decoding a compact JWT
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The token does not have header, payload, and signature sections
    #[error("malformed JWT")]
    MalformedJwt,

    /// The header section is not base64url-encoded JSON
    #[error("malformed JWT header")]
    MalformedJwtHeader(#[source] BoxError),

    /// The payload section is not base64url-encoded JSON
    #[error("malformed JWT payload")]
    MalformedJwtPayload(#[source] BoxError),
}

pub(crate) fn malformed_jwt_header(source: impl Into<BoxError>) -> DecodeError {
    DecodeError::MalformedJwtHeader(source.into())
}

pub(crate) fn malformed_jwt_payload(source: impl Into<BoxError>) -> DecodeError {
    DecodeError::MalformedJwtPayload(source.into())
}

/// A failure reported by one of the remote token operations
///
/// The underlying error is shared so that a single failure can be handed to
/// every caller waiting on the same refresh and kept in the store's state.
#[derive(Clone)]
pub struct RemoteError {
    source: Arc<dyn StdError + Send + Sync + 'static>,
}

impl RemoteError {
    /// Wraps an error returned by a remote operation
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: Arc::from(source.into()),
        }
    }

    /// The underlying error
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.source
    }
}

impl fmt::Debug for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("RemoteError").field(&self.source).finish()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("remote token operation failed")
    }
}

impl StdError for RemoteError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

impl From<BoxError> for RemoteError {
    fn from(source: BoxError) -> Self {
        Self::new(source)
    }
}

/// An error obtaining a fresh access token
#[derive(Clone, Debug, Error)]
pub enum RefreshError {
    /// The remote operation failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The token was cleared or the store reset while the refresh was outstanding
    ///
    /// The result of the refresh was discarded, as it belongs to an identity
    /// that is no longer active.
    #[error("refresh superseded by an identity change")]
    Superseded,

    /// The refresh task ended without producing a result
    #[error("refresh task aborted")]
    Aborted,
}

impl RefreshError {
    /// Whether the error came from the remote operation itself
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Whether the refresh result was discarded due to an identity change
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

/// The store backing a subscription was reset; no further updates will arrive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("token store was reset")]
pub struct SubscriptionClosed {
    _p: (),
}

pub(crate) const fn subscription_closed() -> SubscriptionClosed {
    SubscriptionClosed { _p: () }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_exposes_source() {
        let err = RemoteError::new("session expired");
        assert_eq!(err.to_string(), "remote token operation failed");
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("session expired"));
    }

    #[test]
    fn refresh_error_is_transparent_over_remote() {
        let err = RefreshError::from(RemoteError::new("boom"));
        assert!(err.is_remote());
        assert!(!err.is_superseded());
        assert_eq!(err.to_string(), "remote token operation failed");
    }
}
