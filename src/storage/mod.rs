//! Storage Layer
//!
//! Handles persistence of settings using SQLite, and resolves the
//! application's data and configuration directories.

pub mod database;
pub mod preferences;

use anyhow::Result;
use std::path::PathBuf;

pub use database::Database;
pub use preferences::LanguagePreferences;

/// File name of the settings database inside the data directory
pub const DATABASE_FILE: &str = "snaptext.db";

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "snaptext", "SnapText")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Location of the settings database
pub fn database_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DATABASE_FILE))
}
