pub mod health;
pub mod serve;
