pub mod error;
pub mod guard;
pub mod identity;
pub mod partition;
pub mod schema;
pub mod turn;
