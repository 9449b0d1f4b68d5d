pub mod auth;
pub mod checkins;
pub mod core;
pub mod export;
pub mod goals;
pub mod kids;
pub mod points;
pub mod setup;
