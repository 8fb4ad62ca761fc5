use std::path::PathBuf;

/// Returns the base directory for conductor data.
///
/// Uses `$A3S_CONDUCTOR_HOME` if set, otherwise defaults to `~/.a3s/conductor`.
pub fn conductor_home() -> PathBuf {
    if let Ok(home) = std::env::var("A3S_CONDUCTOR_HOME") {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".a3s")
        .join("conductor")
}

/// Returns the path to the user configuration file.
pub fn config_path() -> PathBuf {
    conductor_home().join("config.toml")
}

/// Returns the path of the persisted run snapshot.
pub fn state_path() -> PathBuf {
    conductor_home().join("state.json")
}

/// Returns the path of the stored tracker credential.
pub fn credentials_path() -> PathBuf {
    conductor_home().join("credentials")
}
