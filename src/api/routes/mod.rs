pub mod health;
pub mod rules;
pub mod stores;
