use std::path::PathBuf;
use std::time::Duration;

use kikx_config::Config;
use kikx_process::{CommandTemplate, ContextPaths};
use kikx_worker::TaskId;

use crate::HostError;

/// Everything needed to build an [`AppContext`](crate::AppContext).
#[derive(Debug, Clone)]
pub struct HostSettings {
	/// Holds `apps/<name>` and the user `bin` directory.
	pub storage_dir: PathBuf,
	/// Holds one data directory per application.
	pub data_dir: PathBuf,
	pub home_dir: PathBuf,
	/// Exported to processes as `PY_PATH`.
	pub interpreter: PathBuf,
	pub task_template: CommandTemplate,
	pub process_idle_timeout: Duration,
	pub idle_disconnect: Duration,
}

impl HostSettings {
	pub fn from_config(config: &Config) -> Result<Self, HostError> {
		config.validate()?;
		Ok(Self {
			storage_dir: config.paths.storage_dir(),
			data_dir: config.paths.data_dir(),
			home_dir: config.paths.home_dir(),
			interpreter: config.interpreter(),
			task_template: CommandTemplate::parse(&config.process.task_template)?,
			process_idle_timeout: config.process.idle_timeout(),
			idle_disconnect: config.channel.idle_disconnect(),
		})
	}

	/// Locations exposed to processes of the app called `name`.
	pub fn context_paths(&self, id: TaskId, name: &str) -> ContextPaths {
		ContextPaths {
			app_id: id.to_string(),
			app_name: name.to_owned(),
			storage_path: self.storage_dir.clone(),
			app_path: self.storage_dir.join("apps").join(name),
			app_data_path: self.data_dir.join(name),
			home_path: self.home_dir.clone(),
			interpreter: Some(self.interpreter.clone()),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn app_paths_derive_from_roots() {
		let mut config = Config::default();
		config.paths.storage = Some("/srv/storage".into());
		config.paths.data = Some("/srv/data".into());
		config.paths.home = Some("/srv/home".into());
		let settings = HostSettings::from_config(&config).unwrap();

		let id = TaskId::new();
		let paths = settings.context_paths(id, "com.kikx.neko");
		assert_eq!(paths.app_id, id.to_string());
		assert_eq!(paths.app_path, PathBuf::from("/srv/storage/apps/com.kikx.neko"));
		assert_eq!(paths.app_data_path, PathBuf::from("/srv/data/com.kikx.neko"));
		assert_eq!(paths.home_path, PathBuf::from("/srv/home"));
	}

	#[test]
	fn processes_always_get_an_interpreter() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = Config::default();
		config.paths.storage = Some(dir.path().join("storage"));
		config.paths.home = Some(dir.path().join("home"));
		let settings = HostSettings::from_config(&config).unwrap();
		assert_eq!(settings.interpreter, PathBuf::from(kikx_config::FALLBACK_INTERPRETER));

		let env = kikx_process::ProcessEnv::build(&settings.context_paths(TaskId::new(), "neko"), Vec::new());
		assert_eq!(env.get(kikx_process::vars::INTERPRETER), Some(kikx_config::FALLBACK_INTERPRETER));

		config.process.interpreter = Some("/srv/venv/bin/python3".into());
		let settings = HostSettings::from_config(&config).unwrap();
		assert_eq!(settings.interpreter, PathBuf::from("/srv/venv/bin/python3"));
	}

	#[test]
	fn bad_template_is_rejected() {
		let mut config = Config::default();
		config.process.task_template = "{command}".into();
		assert!(matches!(HostSettings::from_config(&config), Err(HostError::Process(_))));
	}
}
