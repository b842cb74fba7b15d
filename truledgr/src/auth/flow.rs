//! Identifier-first login.
//!
//! The user enters an email first. The server is asked whether an account exists, then the
//! flow moves to the password step, where either a password or a biometric unlock completes
//! the login through the [`SessionStore`].

use async_trait::async_trait;
use std::fmt;
use tracing::instrument;

use super::api::AuthApi;
use super::models::{AuthUser, Credentials};
use super::session::SessionStore;
use crate::config::UnknownIdentifierPolicy;
use crate::errors::{Error, Result};

pub const INVALID_EMAIL: &str = "Please enter a valid email address";
pub const MISSING_PASSWORD: &str = "Please enter your password";
/// Shown for every failed login so the response never reveals which factor was wrong
pub const LOGIN_FAILED: &str = "Invalid email or password";

const BIOMETRIC_REASON: &str = "Sign in to TruLedgr";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthStep {
    #[default]
    Identifier,
    Password,
}

/// What the server said about the submitted identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierOutcome {
    ExistingAccount,
    /// No account, continuing to the password step anyway
    UnknownAccount,
    /// No account; the caller may offer signup for this email
    JitSignup,
    /// The existence check failed; the password step decides
    CheckFailed,
}

/// Failure or cancellation reported by the platform biometric prompt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BiometricError(pub String);

/// Platform biometric prompt that unlocks stored credentials.
#[async_trait]
pub trait BiometricAuthenticator: Send + Sync {
    async fn authenticate(&self, reason: &str) -> std::result::Result<Credentials, BiometricError>;
}

pub struct IdentifierFlow {
    session: SessionStore,
    policy: UnknownIdentifierPolicy,
    step: AuthStep,
    email: String,
    password: String,
    error: Option<String>,
    loading: bool,
    outcome: Option<IdentifierOutcome>,
}

impl fmt::Debug for IdentifierFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierFlow")
            .field("step", &self.step)
            .field("email", &self.email)
            .field("error", &self.error)
            .field("loading", &self.loading)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl IdentifierFlow {
    pub fn new(session: SessionStore, policy: UnknownIdentifierPolicy) -> Self {
        Self {
            session,
            policy,
            step: AuthStep::Identifier,
            email: String::new(),
            password: String::new(),
            error: None,
            loading: false,
            outcome: None,
        }
    }

    pub fn step(&self) -> AuthStep {
        self.step
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Result of the last identifier check
    pub fn outcome(&self) -> Option<IdentifierOutcome> {
        self.outcome
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// Validate the email and check whether it belongs to an account.
    ///
    /// Every server answer, including a failed check, advances to the password step.
    #[instrument(skip(self), fields(email = %self.email.trim()))]
    pub async fn submit_identifier(&mut self) -> Result<IdentifierOutcome> {
        let email = self.email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            self.error = Some(INVALID_EMAIL.to_string());
            return Err(Error::validation(INVALID_EMAIL));
        }

        self.email = email;
        self.error = None;
        self.loading = true;
        let checked = AuthApi::new(self.session.client()).check_email(&self.email).await;
        self.loading = false;

        let outcome = match checked {
            Ok(true) => IdentifierOutcome::ExistingAccount,
            Ok(false) => match self.policy {
                UnknownIdentifierPolicy::ProceedToPassword => IdentifierOutcome::UnknownAccount,
                UnknownIdentifierPolicy::JitSignup => IdentifierOutcome::JitSignup,
            },
            Err(e) => {
                tracing::info!("Email check failed, continuing to password step: {}", e);
                IdentifierOutcome::CheckFailed
            }
        };

        tracing::debug!(?outcome, "Identifier accepted");
        self.outcome = Some(outcome);
        self.step = AuthStep::Password;
        Ok(outcome)
    }

    #[instrument(skip(self), fields(email = %self.email))]
    pub async fn submit_password(&mut self) -> Result<AuthUser> {
        if self.password.is_empty() {
            self.error = Some(MISSING_PASSWORD.to_string());
            return Err(Error::validation(MISSING_PASSWORD));
        }

        let credentials = Credentials::new(self.email.clone(), self.password.clone());
        self.complete_login(&credentials).await
    }

    /// Unlock stored credentials with the platform prompt and log in with them.
    ///
    /// A prompt failure or cancellation is shown exactly as the platform reported it.
    #[instrument(skip_all)]
    pub async fn submit_biometric(&mut self, authenticator: &dyn BiometricAuthenticator) -> Result<AuthUser> {
        self.error = None;
        let credentials = match authenticator.authenticate(BIOMETRIC_REASON).await {
            Ok(credentials) => credentials,
            Err(BiometricError(message)) => {
                tracing::debug!("Biometric prompt failed: {}", message);
                self.error = Some(message.clone());
                return Err(Error::Auth { message: Some(message) });
            }
        };

        self.complete_login(&credentials).await
    }

    /// Return to the identifier step, dropping the password and any error.
    pub fn go_back_to_identifier(&mut self) {
        self.step = AuthStep::Identifier;
        self.password.clear();
        self.error = None;
        self.outcome = None;
    }

    async fn complete_login(&mut self, credentials: &Credentials) -> Result<AuthUser> {
        self.error = None;
        self.loading = true;
        let result = self.session.login(credentials).await;
        self.loading = false;

        match result {
            Ok(user) => {
                self.password.clear();
                Ok(user)
            }
            Err(e @ Error::Validation { .. }) => {
                self.error = Some(e.user_message());
                Err(e)
            }
            Err(e) => {
                tracing::debug!("Login failed: {}", e);
                self.error = Some(LOGIN_FAILED.to_string());
                Err(e)
            }
        }
    }
}
