pub mod claims;
pub mod liveness;
pub mod store;

pub use claims::{decode, Claims};
pub use store::TokenStore;
