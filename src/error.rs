use core::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A spawned external tool (compiler, archiver, linker, generated binary)
/// exited non-zero or could not be started at all.
#[derive(Debug, Clone)]
pub struct ProcessError {
	pub command: String,
	pub status: Option<i32>,
	pub stderr: String,
}

impl fmt::Display for ProcessError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.status {
			Some(code) => write!(f, "`{}` exited with code {}", self.command, code)?,
			None => write!(f, "`{}` failed to run", self.command)?,
		}
		if !self.stderr.is_empty() {
			write!(f, "\n{}", self.stderr.trim_end())?;
		}
		Ok(())
	}
}

impl std::error::Error for ProcessError {}

#[derive(Debug, Error)]
pub enum Error {
	/// A failure raised by the compile pipeline specifically, as opposed to
	/// any other subprocess failure (install copies, `run` invocations, ...).
	#[error("compilation of `{target}` failed: {source}")]
	Compile {
		target: String,
		#[source]
		source: ProcessError,
	},

	#[error(transparent)]
	Process(#[from] ProcessError),

	#[error("`{0}` is not mapped to the project layout")]
	UnmappedPath(PathBuf),

	#[error("no such target: `{0}`")]
	UnknownTarget(String),

	#[error("duplicate target name: `{0}`")]
	DuplicateTarget(String),

	#[error("target `{0}` cannot be linked against")]
	NotLinkable(String),

	#[error("target `{0}` is not an executable")]
	NotAnExecutable(String),

	#[error("link dependency cycle involving `{0}`")]
	DependencyCycle(String),

	#[error("project `{0}` already has a main target")]
	MainTargetConflict(String),

	#[error("test `{name}` failed with code {code}")]
	TestFailed { name: String, code: i32 },

	#[error("required package `{0}` could not be resolved")]
	UnknownPackage(String),

	#[error("no such toolchain: `{0}`")]
	UnknownToolchain(String),

	#[error("invalid toolchain id: `{0}` (expected <name>-<major>-<arch>)")]
	InvalidToolchainId(String),

	#[error("unknown build type: `{0}`")]
	UnknownBuildType(String),

	#[error("error reading toolchain file `{path}`: {message}")]
	ToolchainFile { path: PathBuf, message: String },

	#[error("error reading manifest `{path}`: {message}")]
	Manifest { path: PathBuf, message: String },

	#[error("generator `{name}` did not produce `{output}`")]
	GeneratorOutput { name: String, output: PathBuf },

	#[error("generator `{name}` failed: {message}")]
	Generator { name: String, message: String },

	#[error("build task failed: {0}")]
	Task(String),

	#[error("invalid glob pattern: {0}")]
	Pattern(#[from] glob::PatternError),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	/// The process exit code the top-level driver should report for this
	/// error: the failing subprocess's own code when one is available,
	/// a generic failure code otherwise.
	pub fn exit_code(&self) -> i32 {
		match self {
			Error::Compile { source, .. } => source.status.unwrap_or(1),
			Error::Process(err) => err.status.unwrap_or(1),
			_ => 1,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn process_error_carries_subprocess_exit_code() {
		let err = Error::Process(ProcessError {
			command: "cc -c a.c".to_owned(),
			status: Some(42),
			stderr: "a.c:1: error".to_owned(),
		});
		assert_eq!(err.exit_code(), 42);
	}

	#[test]
	fn non_process_errors_use_generic_exit_code() {
		assert_eq!(Error::UnknownTarget("nope".to_owned()).exit_code(), 1);
		let spawn_failure = Error::Compile {
			target: "app".to_owned(),
			source: ProcessError {
				command: "cc".to_owned(),
				status: None,
				stderr: String::new(),
			},
		};
		assert_eq!(spawn_failure.exit_code(), 1);
	}
}
