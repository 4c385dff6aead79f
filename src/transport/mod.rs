pub mod client;
pub mod policy;

pub use client::{ApiClient, ApiError, ApiRequest, ApiResponse};
pub use policy::AuthHeaderPolicy;
