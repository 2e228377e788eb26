pub mod loader;
pub mod model;


pub use loader::{load_config, load_config_from_path};
pub use model::*;
