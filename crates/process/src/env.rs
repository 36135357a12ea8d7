use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable names supplied to every spawned process.
pub mod vars {
	pub const APP_ID: &str = "KIKX_APP_ID";
	pub const APP_NAME: &str = "KIKX_APP_NAME";
	pub const STORAGE_PATH: &str = "KIKX_STORAGE_PATH";
	pub const APP_PATH: &str = "KIKX_APP_PATH";
	pub const APP_DATA_PATH: &str = "KIKX_APP_DATA_PATH";
	pub const HOME_PATH: &str = "KIKX_HOME_PATH";
	pub const INTERPRETER: &str = "PY_PATH";
	pub const PATH: &str = "PATH";
}

/// Filesystem locations of the context that owns a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPaths {
	/// Identity token of the owning context.
	pub app_id: String,
	pub app_name: String,
	/// Root of the user's storage; `<storage>/bin` joins the search path.
	pub storage_path: PathBuf,
	/// Root of the application; `<app>/bin` leads the search path.
	pub app_path: PathBuf,
	/// Application-private data directory, also the working directory.
	pub app_data_path: PathBuf,
	pub home_path: PathBuf,
	/// Interpreter exposed as `PY_PATH` for command templates.
	pub interpreter: Option<PathBuf>,
}

/// Environment and working directory shared by all processes of one supervisor.
///
/// Built once per supervisor; processes only read it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEnv {
	vars: BTreeMap<String, String>,
	working_dir: Option<PathBuf>,
}

impl ProcessEnv {
	/// Builds the environment on top of the current process environment.
	pub fn from_current(paths: &ContextPaths) -> Self {
		Self::build(paths, std::env::vars())
	}

	/// Builds the environment on top of an explicit inherited set.
	pub fn build(paths: &ContextPaths, inherited: impl IntoIterator<Item = (String, String)>) -> Self {
		let mut map: BTreeMap<String, String> = inherited.into_iter().collect();

		let mut search = vec![display(&paths.app_path.join("bin")), display(&paths.storage_path.join("bin"))];
		if let Some(system) = map.get(vars::PATH).filter(|p| !p.is_empty()) {
			search.push(system.clone());
		}
		map.insert(vars::PATH.into(), search.join(":"));

		map.insert(vars::APP_ID.into(), paths.app_id.clone());
		map.insert(vars::APP_NAME.into(), paths.app_name.clone());
		map.insert(vars::STORAGE_PATH.into(), display(&paths.storage_path));
		map.insert(vars::APP_PATH.into(), display(&paths.app_path));
		map.insert(vars::APP_DATA_PATH.into(), display(&paths.app_data_path));
		map.insert(vars::HOME_PATH.into(), display(&paths.home_path));
		if let Some(interpreter) = &paths.interpreter {
			map.insert(vars::INTERPRETER.into(), display(interpreter));
		}

		Self {
			vars: map,
			working_dir: Some(paths.app_data_path.clone()),
		}
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.vars.get(key).map(String::as_str)
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.vars.insert(key.into(), value.into());
	}

	pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
		self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// Working directory for spawned processes, if it exists on disk.
	pub fn working_dir(&self) -> Option<&Path> {
		self.working_dir.as_deref().filter(|dir| dir.is_dir())
	}
}

fn display(path: &Path) -> String {
	path.to_string_lossy().into_owned()
}
