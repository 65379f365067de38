pub mod decoder;
pub mod error;
pub mod models;
pub mod recording;
pub mod scorer;
pub mod settings;
