pub mod health;
pub mod turns;
