//! A remote that invokes the token server functions over HTTP

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TokenRemote;
use crate::{error::BoxError, AccessToken, OrganizationIdRef};

/// The path of the server function reading the session's current token
pub const GET_ACCESS_TOKEN_PATH: &str = "access-token";

/// The path of the server function forcing a token refresh
pub const REFRESH_ACCESS_TOKEN_PATH: &str = "refresh-access-token";

/// An error invoking one of the token server functions
#[derive(Debug, Error)]
pub enum ServerFunctionError {
    /// The server function URL could not be constructed
    #[error("invalid server function URL")]
    InvalidUrl(#[source] BoxError),

    /// The request could not be completed
    #[error("error sending request to server function")]
    Transport(#[from] reqwest::Error),

    /// The server function responded with an unsuccessful status
    #[error("server function responded with status {status}")]
    Status {
        /// The HTTP status returned
        status: reqwest::StatusCode,
        /// The response body, if any
        body: String,
    },
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<&'a OrganizationIdRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<AccessToken>,
}

/// Calls the token server functions exposed under a common base URL
///
/// Both operations are JSON `POST`s. The session is carried by whatever
/// cookies or credentials the provided client attaches.
#[derive(Clone, Debug)]
pub struct HttpTokenRemote {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpTokenRemote {
    /// Constructs a new remote
    ///
    /// `base_url` should end in a `/` so that the server function paths are
    /// resolved beneath it.
    pub fn new(client: reqwest::Client, base_url: reqwest::Url) -> Self {
        Self { client, base_url }
    }

    /// The URL of a server function
    pub fn endpoint(&self, path: &str) -> Result<reqwest::Url, ServerFunctionError> {
        self.base_url
            .join(path)
            .map_err(|e| ServerFunctionError::InvalidUrl(e.into()))
    }

    async fn call<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<AccessToken>, ServerFunctionError> {
        let url = self.endpoint(path)?;
        tracing::trace!(%url, "invoking token server function");

        let resp = self.client.post(url).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServerFunctionError::Status { status, body });
        }

        let token: TokenResponse = resp.json().await?;
        Ok(token.access_token.filter(|t| !t.as_str().is_empty()))
    }
}

#[async_trait]
impl TokenRemote for HttpTokenRemote {
    async fn get_access_token(&self) -> Result<Option<AccessToken>, BoxError> {
        Ok(self.call(GET_ACCESS_TOKEN_PATH, &RefreshRequest::default()).await?)
    }

    async fn refresh_access_token(
        &self,
        organization_id: Option<&OrganizationIdRef>,
    ) -> Result<Option<AccessToken>, BoxError> {
        let body = RefreshRequest { organization_id };
        Ok(self.call(REFRESH_ACCESS_TOKEN_PATH, &body).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrganizationId;

    #[test]
    fn endpoints_resolve_under_base() {
        let remote = HttpTokenRemote::new(
            reqwest::Client::new(),
            reqwest::Url::parse("https://app.example.com/_auth/").unwrap(),
        );
        assert_eq!(
            remote.endpoint(REFRESH_ACCESS_TOKEN_PATH).unwrap().as_str(),
            "https://app.example.com/_auth/refresh-access-token"
        );
    }

    #[test]
    fn refresh_body_omits_missing_organization() {
        let body = serde_json::to_string(&RefreshRequest::default()).unwrap();
        assert_eq!(body, "{}");

        let org = OrganizationId::from_static("org_01");
        let body = serde_json::to_string(&RefreshRequest {
            organization_id: Some(&*org),
        })
        .unwrap();
        assert_eq!(body, r#"{"organizationId":"org_01"}"#);
    }

    #[test]
    fn null_token_means_no_session() {
        let resp: TokenResponse = serde_json::from_str(r#"{"accessToken":null}"#).unwrap();
        assert!(resp.access_token.is_none());
    }
}
