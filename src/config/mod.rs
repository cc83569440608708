// src/config/mod.rs

pub mod loader;
pub mod merge;
pub mod model;
pub mod validate;

pub use loader::{CONFIG_INDEX, ConfigurationLoader, LoadOptions, load_settings_file};
pub use merge::{Settings, deep_merge, get_path, merged, parse_assignment, set_path};
pub use model::{
    ConfigIndex, Configuration, GeneralSettings, MEMBER_SETTINGS, SuiteSettings, TestbedSettings,
};
