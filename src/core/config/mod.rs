pub mod data;
pub mod io;
pub mod printing;


pub use data::{Config, Settings, SettingsOverrides};
pub use io::ConfigError;
