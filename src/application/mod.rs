//! Application layer: orchestration of store, Matrix and web pieces

pub mod bot;
pub mod space;

pub use bot::{authenticate, BotCredentials, LokiBot, Registration};
pub use space::SpaceAccess;
