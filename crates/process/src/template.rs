use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use shell_escape::unix::escape;

use crate::ProcessError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Literal(String),
	Name,
	Args,
}

/// Template that turns a command line into the shell command actually run.
///
/// Two placeholders are recognised: `{name}` receives the first word of the
/// command line and `{args}` receives the remaining words, each shell-quoted.
/// `{{` and `}}` produce literal braces. Everything else, including `$VAR`
/// references, is passed to the shell untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
	raw: String,
	segments: Vec<Segment>,
}

impl CommandTemplate {
	/// Template used when no other is configured: runs `tasks/<name>.py`
	/// under the context interpreter.
	pub const DEFAULT: &'static str = "$PY_PATH -u $KIKX_APP_PATH/tasks/{name}.py {args}";

	/// Template that runs the command line as given.
	pub const PASSTHROUGH: &'static str = "{name} {args}";

	pub fn parse(raw: &str) -> Result<Self, ProcessError> {
		let mut segments = Vec::new();
		let mut literal = String::new();
		let mut chars = raw.chars().peekable();

		while let Some(ch) = chars.next() {
			match ch {
				'{' if chars.peek() == Some(&'{') => {
					chars.next();
					literal.push('{');
				}
				'}' if chars.peek() == Some(&'}') => {
					chars.next();
					literal.push('}');
				}
				'{' => {
					let mut field = String::new();
					loop {
						match chars.next() {
							Some('}') => break,
							Some(c) => field.push(c),
							None => return Err(ProcessError::Template(format!("unterminated placeholder `{{{field}` in `{raw}`"))),
						}
					}
					let segment = match field.as_str() {
						"name" => Segment::Name,
						"args" => Segment::Args,
						other => return Err(ProcessError::Template(format!("unknown placeholder `{{{other}}}`"))),
					};
					if !literal.is_empty() {
						segments.push(Segment::Literal(std::mem::take(&mut literal)));
					}
					segments.push(segment);
				}
				'}' => return Err(ProcessError::Template(format!("single `}}` in `{raw}`"))),
				c => literal.push(c),
			}
		}
		if !literal.is_empty() {
			segments.push(Segment::Literal(literal));
		}

		Ok(Self { raw: raw.to_owned(), segments })
	}

	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// Expands a command line into a shell command.
	///
	/// The line is split with shell word rules. An empty line is
	/// [`ProcessError::EmptyCommand`].
	pub fn expand(&self, command_line: &str) -> Result<String, ProcessError> {
		let words = shlex::split(command_line).ok_or_else(|| ProcessError::InvalidCommandLine(command_line.to_owned()))?;
		let Some((name, args)) = words.split_first() else {
			return Err(ProcessError::EmptyCommand);
		};

		let name = quote(name);
		let args = args.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" ");

		let mut out = String::with_capacity(self.raw.len() + command_line.len());
		for segment in &self.segments {
			match segment {
				Segment::Literal(text) => out.push_str(text),
				Segment::Name => out.push_str(&name),
				Segment::Args => out.push_str(&args),
			}
		}
		Ok(out)
	}
}

impl FromStr for CommandTemplate {
	type Err = ProcessError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for CommandTemplate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.raw)
	}
}

fn quote(word: &str) -> Cow<'_, str> {
	escape(Cow::Borrowed(word))
}
