//! Configuration file discovery and data directory resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Data directory resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(data_dir) = config.get("data_dir").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(data_dir));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_data_dir())
}

/// Locate the configuration file for the platform
///
/// Linux: `~/.config/cropscout/config.toml`, then
/// `/etc/cropscout/config.toml`. macOS/Windows: the user config dir.
pub fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        let user_config = dirs::config_dir().map(|d| d.join("cropscout").join("config.toml"));
        let system_config = PathBuf::from("/etc/cropscout/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("cropscout").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/cropscout (or /var/lib/cropscout for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("cropscout"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/cropscout"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("cropscout"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/cropscout"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("cropscout"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\cropscout"))
    } else {
        PathBuf::from("./cropscout_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// CLI argument wins over everything else
    #[test]
    #[serial]
    fn test_resolve_data_dir_cli_priority() {
        std::env::set_var("CROPSCOUT_TEST_DATA_DIR", "/from/env");
        let resolved = resolve_data_dir(Some("/from/cli"), "CROPSCOUT_TEST_DATA_DIR")
            .expect("resolution should succeed");
        assert_eq!(resolved, PathBuf::from("/from/cli"));
        std::env::remove_var("CROPSCOUT_TEST_DATA_DIR");
    }

    /// Environment variable is used when no CLI argument is given
    #[test]
    #[serial]
    fn test_resolve_data_dir_env_priority() {
        std::env::set_var("CROPSCOUT_TEST_DATA_DIR", "/from/env");
        let resolved = resolve_data_dir(None, "CROPSCOUT_TEST_DATA_DIR")
            .expect("resolution should succeed");
        assert_eq!(resolved, PathBuf::from("/from/env"));
        std::env::remove_var("CROPSCOUT_TEST_DATA_DIR");
    }

    /// Falls through to the compiled default when nothing is configured
    #[test]
    #[serial]
    fn test_resolve_data_dir_default() {
        std::env::remove_var("CROPSCOUT_TEST_DATA_DIR");
        let resolved = resolve_data_dir(None, "CROPSCOUT_TEST_DATA_DIR")
            .expect("resolution should succeed");
        // Platform-dependent, but never empty
        assert!(!resolved.as_os_str().is_empty());
    }
}
