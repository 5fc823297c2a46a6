pub mod events;
pub mod health;
pub mod session;
pub mod ws;
