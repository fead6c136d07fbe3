//! Outpost Data -- catalog content and scheduler configuration from RON,
//! TOML or JSON files.

pub mod loader;
pub mod resolve;
pub mod schema;

pub use loader::{DataLoadError, GameData, load_catalog, load_config, load_game_data};
