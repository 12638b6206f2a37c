/// Default locations of the detector's data files.
///
/// All files live under one application directory:
///   - config.toml  Allow/deny lists and tuning, written by the host.
///   - games.json   Local cache of the game catalog.
///
/// On Windows the directory is `%APPDATA%\GameDetector`; elsewhere it is
/// `$XDG_CONFIG_HOME/game-detector` or `$HOME/.config/game-detector`.
use std::path::PathBuf;

#[cfg(windows)]
const APP_DIR_NAME: &str = "GameDetector";
#[cfg(not(windows))]
const APP_DIR_NAME: &str = "game-detector";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CATALOG_CACHE_FILE_NAME: &str = "games.json";

/// Returns the application data directory, or `None` if the environment
/// does not name a base directory.
pub fn app_data_dir() -> Option<PathBuf> {
    base_dir().map(|base| base.join(APP_DIR_NAME))
}

#[cfg(windows)]
fn base_dir() -> Option<PathBuf> {
    std::env::var_os("APPDATA")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(not(windows))]
fn base_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|v| !v.is_empty())
                .map(|home| PathBuf::from(home).join(".config"))
        })
}

pub fn config_file_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

pub fn catalog_cache_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(CATALOG_CACHE_FILE_NAME))
}
