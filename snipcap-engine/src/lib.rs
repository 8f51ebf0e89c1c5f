pub mod delivery;
pub mod duration;
pub mod engine;
pub mod session;
pub mod traits;
pub mod watchers;
