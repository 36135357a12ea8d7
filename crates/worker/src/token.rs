use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque correlation token for one scheduled unit of work.
///
/// Rendered, and serialized, as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TaskId(Uuid);

impl TaskId {
	/// Generates a fresh random id.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for TaskId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.simple())
	}
}

impl FromStr for TaskId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::try_parse(s).map(Self)
	}
}

impl From<TaskId> for String {
	fn from(id: TaskId) -> Self {
		id.to_string()
	}
}

impl TryFrom<String> for TaskId {
	type Error = uuid::Error;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		s.parse()
	}
}
