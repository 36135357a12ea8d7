//! Default filesystem locations.

use std::path::PathBuf;

/// Environment variable overriding the IPC socket location.
pub const SOCKET_ENV: &str = "KIKX_SOCKET";

const SOCKET_NAME: &str = "kikx-host.sock";

/// Returns the default socket path for the host.
///
/// # Resolution Order
///
/// 1. `KIKX_SOCKET` environment variable.
/// 2. System runtime directory (e.g., `$XDG_RUNTIME_DIR`).
/// 3. System temp directory (e.g., `/tmp`).
#[must_use]
pub fn default_socket_path() -> PathBuf {
	if let Ok(p) = std::env::var(SOCKET_ENV) {
		return PathBuf::from(p);
	}

	dirs::runtime_dir()
		.filter(|p| std::fs::create_dir_all(p).is_ok())
		.unwrap_or_else(std::env::temp_dir)
		.join(SOCKET_NAME)
}

/// `$XDG_CONFIG_HOME/kikx/config.toml`, when a config directory is known.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("kikx").join("config.toml"))
}

fn data_root() -> PathBuf {
	dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("kikx")
}

pub(crate) fn default_storage_dir() -> PathBuf {
	data_root().join("storage")
}

pub(crate) fn default_data_dir() -> PathBuf {
	data_root().join("data")
}

pub(crate) fn default_home_dir() -> PathBuf {
	dirs::home_dir().unwrap_or_else(data_root)
}
