//! Application wiring: configuration and component initialization

pub mod config;
pub mod init;
pub mod loader;

pub use config::AppConfig;
pub use init::init_runtime;
pub use loader::load_config;
