// Settings module
pub mod settings;
pub mod store;

pub use settings::PlayerSettings;
pub use store::{SettingsStore, TrackVolume};
