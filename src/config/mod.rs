pub mod credentials;
pub mod prompt;
pub mod settings;
