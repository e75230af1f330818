//! Remote token operations
//!
//! The store never talks to the identity provider itself. Instead it calls
//! two server-side operations: one that reads the token already associated
//! with the current session, and one that forces the server to obtain a new
//! token, optionally scoped to a different organization.

use async_trait::async_trait;

use crate::{error::BoxError, AccessToken, OrganizationIdRef};

#[cfg(feature = "http")]
pub mod http;

/// The server-side token operations the store depends on
#[async_trait]
pub trait TokenRemote: Send + Sync {
    /// Gets the token associated with the current session without forcing a
    /// refresh
    ///
    /// Returns `None` when there is no active session.
    async fn get_access_token(&self) -> Result<Option<AccessToken>, BoxError>;

    /// Forces the server to obtain a new token from the identity provider
    ///
    /// When `organization_id` is provided, the new token is scoped to that
    /// organization. Returns `None` when there is no active session.
    async fn refresh_access_token(
        &self,
        organization_id: Option<&OrganizationIdRef>,
    ) -> Result<Option<AccessToken>, BoxError>;
}

#[async_trait]
impl<T: TokenRemote + ?Sized> TokenRemote for std::sync::Arc<T> {
    async fn get_access_token(&self) -> Result<Option<AccessToken>, BoxError> {
        (**self).get_access_token().await
    }

    async fn refresh_access_token(
        &self,
        organization_id: Option<&OrganizationIdRef>,
    ) -> Result<Option<AccessToken>, BoxError> {
        (**self).refresh_access_token(organization_id).await
    }
}

/// A remote that always hands out the same token
///
/// Useful for tests, demos, and hosts that provision a long-lived token out
/// of band.
#[derive(Clone, Debug)]
pub struct StaticTokenRemote {
    token: Option<AccessToken>,
}

impl StaticTokenRemote {
    /// Constructs a remote that returns `token` from both operations
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(AccessToken::new(token.into())),
        }
    }

    /// Constructs a remote that behaves as though there is no session
    pub const fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenRemote for StaticTokenRemote {
    async fn get_access_token(&self) -> Result<Option<AccessToken>, BoxError> {
        Ok(self.token.clone())
    }

    async fn refresh_access_token(
        &self,
        _organization_id: Option<&OrganizationIdRef>,
    ) -> Result<Option<AccessToken>, BoxError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_remote_returns_its_token() {
        let remote = StaticTokenRemote::new("opaque-token");
        assert_eq!(
            remote.get_access_token().await.unwrap().as_deref(),
            Some(crate::AccessTokenRef::from_str("opaque-token"))
        );
        assert!(StaticTokenRemote::signed_out()
            .refresh_access_token(None)
            .await
            .unwrap()
            .is_none());
    }
}
