pub mod engine;
pub mod gates;
pub mod injection;
pub mod sessions;
