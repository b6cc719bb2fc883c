pub mod password;
pub mod registration;
pub mod session;

pub use password::{request_password_reset, reset_password};
pub use registration::{
    register, request_email_verification, request_phone_verification, verify_email, verify_phone,
};
pub use session::{login, logout, me, refresh};
