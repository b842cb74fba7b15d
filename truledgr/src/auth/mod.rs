//! Authentication: credentials, the client-side session and the identifier-first login flow.

pub mod api;
pub mod flow;
pub mod models;
pub mod session;
pub mod token_store;

pub use api::AuthApi;
pub use flow::{AuthStep, BiometricAuthenticator, BiometricError, IdentifierFlow, IdentifierOutcome};
pub use models::{AuthUser, Credentials, LoginResponse, Session};
pub use session::{SessionState, SessionStore};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
