//! Typed wrappers for the `/auth` endpoints.

use tracing::instrument;

use super::models::{AuthUser, CheckEmailRequest, CheckEmailResponse, Credentials, LoginResponse, LogoutRequest};
use crate::errors::Result;
use crate::http::{ApiClient, ApiRequest};

pub struct AuthApi<'c> {
    client: &'c ApiClient,
}

impl<'c> AuthApi<'c> {
    pub fn new(client: &'c ApiClient) -> Self {
        Self { client }
    }

    /// `POST /auth/login` with form-encoded credentials.
    ///
    /// Sent without the current session token, so a 401 here means bad credentials and leaves
    /// any existing session alone.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse> {
        let request = ApiRequest::post("auth/login")
            .anonymous()
            .form(&[("username", credentials.username.as_str()), ("password", credentials.password.as_str())]);
        self.client.send_json(request).await
    }

    #[instrument(skip(self))]
    pub async fn logout(&self, all_sessions: bool) -> Result<()> {
        let request = ApiRequest::post("auth/logout").json(&LogoutRequest { all_sessions })?;
        self.client.send_empty(request).await
    }

    pub async fn me(&self) -> Result<AuthUser> {
        self.client.get_json("auth/me").await
    }

    #[instrument(skip(self))]
    pub async fn check_email(&self, email: &str) -> Result<bool> {
        let request = ApiRequest::post("auth/check-email").anonymous().json(&CheckEmailRequest { email })?;
        let response: CheckEmailResponse = self.client.send_json(request).await?;
        Ok(response.exists)
    }
}
