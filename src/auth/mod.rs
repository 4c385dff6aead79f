pub mod backend;
pub mod coordinator;
pub mod error;
pub mod lifecycle;

pub use backend::{AuthBackend, Credentials, HttpAuthBackend, RegisterRequest, TokenResponse};
pub use coordinator::RefreshCoordinator;
pub use error::{AuthError, BackendError, RefreshError};
pub use lifecycle::{LoginOutcome, SessionManager, SessionStatus};
