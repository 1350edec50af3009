//! Domain Layer
//!
//! Core business entity definitions

pub mod account;
pub mod matrix_user;

pub use account::Account;
pub use matrix_user::MatrixUser;
