//! Configuration for the kikx host.
//!
//! Configuration is a single TOML file. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration:
//!
//! ```toml
//! [server]
//! socket = "/run/user/1000/kikx-host.sock"
//! log_dir = "/var/log/kikx"
//!
//! [channel]
//! idle_disconnect_secs = 600
//!
//! [process]
//! idle_timeout_secs = 30
//! task_template = "$PY_PATH -u $KIKX_APP_PATH/tasks/{name}.py {args}"
//! interpreter = "/usr/bin/python3"
//!
//! [paths]
//! storage = "/srv/kikx/storage"
//! data = "/srv/kikx/data"
//! home = "/srv/kikx/home"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod paths;

pub use error::{ConfigError, Result};

/// Default command template for `tasks.run_task`.
pub const DEFAULT_TASK_TEMPLATE: &str = "$PY_PATH -u $KIKX_APP_PATH/tasks/{name}.py {args}";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	pub server: ServerConfig,
	pub channel: ChannelConfig,
	pub process: ProcessConfig,
	pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
	/// IPC socket; see [`paths::default_socket_path`] when unset.
	pub socket: Option<PathBuf>,
	/// Directory for log files; logs go to stderr when unset.
	pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
	/// How long a context survives without a connection.
	pub idle_disconnect_secs: u64,
}

impl Default for ChannelConfig {
	fn default() -> Self {
		Self { idle_disconnect_secs: 600 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
	/// Silence tolerated on a streaming process before it is checked on.
	pub idle_timeout_secs: u64,
	pub task_template: String,
	/// Interpreter exported to processes as `PY_PATH`; see
	/// [`Config::interpreter`] when unset.
	pub interpreter: Option<PathBuf>,
}

impl Default for ProcessConfig {
	fn default() -> Self {
		Self {
			idle_timeout_secs: 30,
			task_template: DEFAULT_TASK_TEMPLATE.to_owned(),
			interpreter: None,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
	/// Root holding `apps/<name>` and the user `bin` directory.
	pub storage: Option<PathBuf>,
	/// Root of per-application data directories.
	pub data: Option<PathBuf>,
	pub home: Option<PathBuf>,
}

impl Config {
	/// Reads and validates the file at `path`.
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		text.parse()
	}

	/// Loads `path` if given, else the default config file if it exists, else
	/// the defaults.
	pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
		match path {
			Some(path) => Self::load(path),
			None => match paths::default_config_path().filter(|p| p.is_file()) {
				Some(path) => Self::load(&path),
				None => Ok(Self::default()),
			},
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.channel.idle_disconnect_secs == 0 {
			return Err(ConfigError::Invalid {
				field: "channel.idle_disconnect_secs",
				reason: "must be greater than zero".into(),
			});
		}
		if self.process.idle_timeout_secs == 0 {
			return Err(ConfigError::Invalid {
				field: "process.idle_timeout_secs",
				reason: "must be greater than zero".into(),
			});
		}
		if self.process.task_template.trim().is_empty() {
			return Err(ConfigError::Invalid {
				field: "process.task_template",
				reason: "must not be empty".into(),
			});
		}
		Ok(())
	}
}

impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self> {
		let config: Self = toml::from_str(s)?;
		config.validate()?;
		Ok(config)
	}
}

impl ServerConfig {
	pub fn socket_path(&self) -> PathBuf {
		self.socket.clone().unwrap_or_else(paths::default_socket_path)
	}
}

impl ChannelConfig {
	pub fn idle_disconnect(&self) -> Duration {
		Duration::from_secs(self.idle_disconnect_secs)
	}
}

impl ProcessConfig {
	pub fn idle_timeout(&self) -> Duration {
		Duration::from_secs(self.idle_timeout_secs)
	}
}

/// Fallback interpreter, looked up on `PATH` by the shell.
pub const FALLBACK_INTERPRETER: &str = "python3";

const VENV_PYTHON: &str = "venv/bin/python3";

impl Config {
	/// Interpreter exported as `PY_PATH`.
	///
	/// The configured one wins. Otherwise the first existing virtualenv of
	/// `<storage>/venv` and `<home>/../../venv` is used, then
	/// [`FALLBACK_INTERPRETER`].
	pub fn interpreter(&self) -> PathBuf {
		if let Some(interpreter) = &self.process.interpreter {
			return interpreter.clone();
		}
		let home = self.paths.home_dir();
		[Some(self.paths.storage_dir()), home.parent().and_then(Path::parent).map(Path::to_path_buf)]
			.into_iter()
			.flatten()
			.map(|root| root.join(VENV_PYTHON))
			.find(|python| python.is_file())
			.unwrap_or_else(|| PathBuf::from(FALLBACK_INTERPRETER))
	}
}

impl PathsConfig {
	pub fn storage_dir(&self) -> PathBuf {
		self.storage.clone().unwrap_or_else(paths::default_storage_dir)
	}

	pub fn data_dir(&self) -> PathBuf {
		self.data.clone().unwrap_or_else(paths::default_data_dir)
	}

	pub fn home_dir(&self) -> PathBuf {
		self.home.clone().unwrap_or_else(paths::default_home_dir)
	}
}
