//! Wire schema of invocation requests and its validation limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::InvokeError;

pub const PATH: &str = "path";
pub const CONFIG: &str = "config";
pub const ARGS: &str = "args";
pub const OPTIONS: &str = "options";
pub const TIMEOUT: &str = "timeout";

/// Validation limits for incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationLimits {
	/// Max dot-separated segments in a path.
	pub max_path_segments: usize,
	/// Max byte length of a path.
	pub max_path_len: usize,
	/// Max positional args per request.
	pub max_args: usize,
}

pub const DEFAULT_LIMITS: InvocationLimits = InvocationLimits {
	max_path_segments: 16,
	max_path_len: 256,
	max_args: 64,
};

/// `{ "path": ..., "config": { "args": [...], "options": {...}, "timeout": secs } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
	pub path: String,
	#[serde(default)]
	pub config: InvocationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
	pub args: Vec<Value>,
	pub options: Map<String, Value>,
	/// Seconds; zero or negative means unbounded.
	pub timeout: f64,
}

impl InvocationRequest {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			config: InvocationConfig::default(),
		}
	}

	pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
		self.config.args = args.into_iter().collect();
		self
	}

	pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
		self.config.options.insert(key.into(), value);
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout.as_secs_f64();
		self
	}

	/// Checks the request against `limits`.
	pub fn validate(&self, limits: &InvocationLimits) -> Result<(), InvokeError> {
		if self.path.is_empty() {
			return Err(InvokeError::InvalidRequest("path is empty".into()));
		}
		if self.path.len() > limits.max_path_len {
			return Err(InvokeError::InvalidRequest(format!("path exceeds {} bytes", limits.max_path_len)));
		}
		let mut segments = 0;
		for segment in self.path.split('.') {
			if segment.is_empty() {
				return Err(InvokeError::InvalidRequest(format!("path `{}` has an empty segment", self.path)));
			}
			segments += 1;
		}
		if segments > limits.max_path_segments {
			return Err(InvokeError::InvalidRequest(format!("path exceeds {} segments", limits.max_path_segments)));
		}
		if self.config.args.len() > limits.max_args {
			return Err(InvokeError::InvalidRequest(format!("more than {} args", limits.max_args)));
		}
		let timeout = self.config.timeout;
		if timeout.is_finite() && timeout > 0.0 && Duration::try_from_secs_f64(timeout).is_err() {
			return Err(InvokeError::InvalidRequest(format!("timeout {timeout} is out of range")));
		}
		Ok(())
	}
}

impl InvocationConfig {
	/// Requested deadline, if any. Values no [`Duration`] can hold count as none.
	pub fn timeout(&self) -> Option<Duration> {
		if !(self.timeout.is_finite() && self.timeout > 0.0) {
			return None;
		}
		Duration::try_from_secs_f64(self.timeout).ok()
	}
}
