pub mod config;
pub mod data_uri;
pub mod stage;
pub mod types;

pub use config::*;
pub use data_uri::*;
pub use stage::*;
pub use types::*;
