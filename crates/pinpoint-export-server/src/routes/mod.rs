pub mod capture;
pub mod flush;
pub mod health;
