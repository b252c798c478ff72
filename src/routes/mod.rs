pub mod download;
pub mod health;
pub mod proxy;
pub mod video;
