pub mod auth;
pub mod authorization;

pub use auth::{authentication_middleware, AuthContext, AuthUser};
pub use authorization::{authorization_middleware, DOMAIN_HEADER};
