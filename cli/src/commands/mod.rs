pub mod ask;
pub mod authorize;
pub mod guard;
pub mod health;
pub mod schema;
