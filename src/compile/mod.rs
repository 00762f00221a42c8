pub mod deps;
pub mod flavor;

use std::{
	ffi::OsString,
	fs,
	path::{Path, PathBuf},
	process::Stdio,
	sync::{Arc, Mutex},
};

use sha2::{Digest, Sha256};

use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
	error::{Error, ProcessError},
	misc,
	target::TargetCore,
	toolchain::Toolchain,
};

use flavor::Flavor;

/// Shared record of every command line a runner issued. Tests hang one of
/// these on a driver to observe (or, with dry-run, replace) tool launches.
pub type CommandLog = Arc<Mutex<Vec<String>>>;

/// Wraps one tool executable. Each `run` spawns the tool, waits for it and
/// captures stderr; a non-zero exit becomes a `ProcessError`.
#[derive(Clone)]
pub struct Runner {
	exe: PathBuf,
	base_args: Vec<String>,
	env: Vec<(String, String)>,
	recorder: Option<CommandLog>,
	dry_run: bool,
}

impl Runner {
	pub fn new(exe: PathBuf, base_args: Vec<String>, env: Vec<(String, String)>) -> Self {
		Runner {
			exe,
			base_args,
			env,
			recorder: None,
			dry_run: false,
		}
	}

	fn recorded(mut self, recorder: Option<CommandLog>, dry_run: bool) -> Self {
		self.recorder = recorder;
		self.dry_run = dry_run;
		self
	}

	pub async fn run(&self, args: &[String]) -> Result<(), ProcessError> {
		let mut command_line = self.exe.to_string_lossy().into_owned();
		for arg in self.base_args.iter().chain(args.iter()) {
			command_line.push(' ');
			command_line.push_str(arg);
		}
		log::debug!("cmd: {}", command_line);
		if let Some(recorder) = &self.recorder {
			recorder.lock().unwrap_or_else(|e| e.into_inner()).push(command_line.clone());
		}
		if self.dry_run {
			return Ok(());
		}

		let output = tokio::process::Command::new(&self.exe)
			.args(&self.base_args)
			.args(args)
			.envs(self.env.iter().map(|(k, v)| (k.clone(), v.clone())))
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.output()
			.await
			.map_err(|e| ProcessError {
				command: command_line.clone(),
				status: None,
				stderr: e.to_string(),
			})?;

		if output.status.success() {
			Ok(())
		} else {
			Err(ProcessError {
				command: command_line,
				status: output.status.code(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			})
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
	StaticLib,
	SharedLib,
	Executable,
}

/// The final binary a target produces, as declared by the target's type.
/// The driver never guesses the kind from the path suffix.
#[derive(Clone, Debug)]
pub struct Artifact {
	pub kind: ArtifactKind,
	pub path: PathBuf,
}

/// Drives a toolchain: object compilation, archiving, linking, and the
/// per-target orchestration of all three with staleness detection.
pub struct Driver {
	toolchain: Arc<Toolchain>,
	flavor: Box<dyn Flavor>,
	cc: Runner,
	cxx: Runner,
	ar: Runner,
	link: Runner,
	jobs: Option<Arc<Semaphore>>,
}

impl Driver {
	pub fn new(toolchain: Arc<Toolchain>, jobs: Option<usize>) -> Self {
		Self::build_driver(toolchain, jobs, None, false)
	}

	/// A driver that records every command, optionally without spawning
	/// anything. Test-facing but not test-only: `--dry-run` style tooling
	/// uses the same path.
	pub fn recording(toolchain: Arc<Toolchain>, jobs: Option<usize>, log: CommandLog, dry_run: bool) -> Self {
		Self::build_driver(toolchain, jobs, Some(log), dry_run)
	}

	fn build_driver(toolchain: Arc<Toolchain>, jobs: Option<usize>, log: Option<CommandLog>, dry_run: bool) -> Self {
		let env = toolchain.env.clone();
		let wrap = |tool: &PathBuf| match &toolchain.ccache {
			// The cache tool receives the real compiler as its first argument.
			Some(ccache) => Runner::new(ccache.clone(), vec![tool.to_string_lossy().into_owned()], env.clone()),
			None => Runner::new(tool.clone(), Vec::new(), env.clone()),
		};
		let cc = wrap(&toolchain.cc).recorded(log.clone(), dry_run);
		let cxx = wrap(&toolchain.cxx).recorded(log.clone(), dry_run);
		let ar = Runner::new(toolchain.ar.clone(), Vec::new(), env.clone()).recorded(log.clone(), dry_run);
		let link = Runner::new(toolchain.link.clone(), Vec::new(), env).recorded(log, dry_run);
		if let Some(ccache) = &toolchain.ccache {
			log::info!("using compile cache: {}", ccache.display());
		}
		Driver {
			flavor: flavor::for_family(toolchain.family),
			toolchain,
			cc,
			cxx,
			ar,
			link,
			jobs: jobs.map(|n| Arc::new(Semaphore::new(n.max(1)))),
		}
	}

	pub fn flavor(&self) -> &dyn Flavor {
		self.flavor.as_ref()
	}

	pub fn toolchain(&self) -> &Toolchain {
		&self.toolchain
	}

	pub async fn compile_object(
		&self,
		source: &PathBuf,
		out: &PathBuf,
		flags: &[String],
		pic: bool,
	) -> Result<(), ProcessError> {
		let name = source.to_string_lossy();
		let (runner, toolchain_flags) = if misc::is_c_source(&name) {
			(&self.cc, &self.toolchain.c_flags)
		} else {
			(&self.cxx, &self.toolchain.cxx_flags)
		};
		let mut all_flags = toolchain_flags.clone();
		all_flags.extend(flags.iter().cloned());
		runner.run(&self.flavor.compile_args(source, out, &all_flags, pic)).await
	}

	pub async fn create_static_lib(&self, output: &PathBuf, objects: &[String]) -> Result<(), ProcessError> {
		self.ar.run(&self.flavor.static_lib_args(output, objects)).await
	}

	pub async fn create_shared_lib(
		&self,
		output: &PathBuf,
		objects: &[String],
		flags: &[String],
		pic: bool,
	) -> Result<(), ProcessError> {
		self.link.run(&self.flavor.shared_lib_args(output, objects, flags, pic)).await
	}

	pub async fn link_executable(
		&self,
		output: &PathBuf,
		objects: &[String],
		flags: &[String],
		pic: bool,
	) -> Result<(), ProcessError> {
		self.link.run(&self.flavor.link_args(output, objects, flags, pic)).await
	}

	/// Builds one target: staleness per source, concurrent compilation of
	/// every stale source, then the archive/link step when anything was
	/// recompiled, a dependency artifact changed (`relink`), or the
	/// artifact is missing. Returns whether the artifact was (re)made.
	///
	/// All spawned compilations are awaited even after a failure, so no
	/// child process is orphaned; the first failure is then reported.
	pub async fn compile(
		self: &Arc<Self>,
		target: &TargetCore,
		artifact: Option<Artifact>,
		pic: bool,
		force: bool,
		relink: bool,
	) -> Result<bool, Error> {
		log::info!("building {}", target.name());
		let build_path = target.build_path().to_owned();
		fs::create_dir_all(&build_path)?;

		let include_dirs = target.effective_include_dirs();
		let mut opts: Vec<String> = Vec::new();
		for dir in &include_dirs {
			opts.push(format!("{}{}", self.flavor.include_path_flag(), dir.display()));
		}
		for (name, value) in target.effective_definitions() {
			match value {
				Some(v) => opts.push(format!("{}{}={}", self.flavor.define_flag(), name, v)),
				None => opts.push(format!("{}{}", self.flavor.define_flag(), name)),
			}
		}
		opts.extend(target.effective_options());
		let opts = Arc::new(opts);

		let mut objects: Vec<String> = Vec::new();
		let mut compilations: JoinSet<Result<(), Error>> = JoinSet::new();
		let mut scheduled = 0usize;
		for source in target.compile_sources() {
			let out = match object_path(&build_path, target.source_path(), &source, self.flavor.object_extension()) {
				Some(x) => x,
				None => continue,
			};
			if let Some(parent) = out.parent() {
				fs::create_dir_all(parent)?;
			}
			objects.push(out.to_string_lossy().into_owned());

			let source_deps = deps::source_deps(&source, &include_dirs)?;
			let stale = force
				|| !out.exists()
				|| source.metadata()?.modified()? > out.metadata()?.modified()?
				|| deps::is_source_outdated(&build_path, &source, &source_deps)?;
			if !stale {
				log::info!("object {} is up-to-date", out.display());
				continue;
			}

			scheduled += 1;
			let driver = Arc::clone(self);
			let jobs = self.jobs.clone();
			let opts = Arc::clone(&opts);
			let build_path = build_path.clone();
			let target_name = target.name().to_owned();
			compilations.spawn(async move {
				let _permit = match jobs {
					Some(sem) => Some(sem.acquire_owned().await.map_err(|e| Error::Task(e.to_string()))?),
					None => None,
				};
				log::info!("compiling {} ({})", source.display(), target_name);
				driver.compile_object(&source, &out, &opts, pic).await?;
				deps::update_deps_timestamps(&build_path, &source, &source_deps)?;
				Ok(())
			});
		}

		// Await everything we started; remember only the first failure.
		let mut first_error: Option<Error> = None;
		while let Some(joined) = compilations.join_next().await {
			let result = match joined {
				Ok(x) => x,
				Err(e) => Err(Error::Task(e.to_string())),
			};
			if let Err(e) = result {
				if first_error.is_none() {
					first_error = Some(e);
				}
			}
		}
		if let Some(e) = first_error {
			return Err(match e {
				Error::Process(p) => Error::Compile {
					target: target.name().to_owned(),
					source: p,
				},
				other => other,
			});
		}

		let artifact = match artifact {
			Some(x) => x,
			None => return Ok(scheduled > 0),
		};
		if scheduled == 0 && !relink && artifact.path.exists() {
			return Ok(false);
		}

		if let Some(parent) = artifact.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let mut link_opts = self.toolchain.link_flags.clone();
		for dir in target.effective_library_dirs() {
			link_opts.push(format!("{}{}", self.flavor.lib_path_flag(), dir.display()));
		}
		for name in target.link_names() {
			link_opts.push(self.flavor.lib_flag(&name));
		}

		let linked = match artifact.kind {
			ArtifactKind::StaticLib => {
				log::info!("creating archive {}", artifact.path.display());
				self.create_static_lib(&artifact.path, &objects).await
			}
			ArtifactKind::SharedLib => {
				log::info!("creating library {}", artifact.path.display());
				self.create_shared_lib(&artifact.path, &objects, &link_opts, pic).await
			}
			ArtifactKind::Executable => {
				log::info!("linking {}", artifact.path.display());
				self.link_executable(&artifact.path, &objects, &link_opts, pic).await
			}
		};
		if let Err(p) = linked {
			return Err(Error::Compile {
				target: target.name().to_owned(),
				source: p,
			});
		}
		Ok(true)
	}
}

/// Object file location for one source: the source tree is mirrored under
/// the target build dir, so same-named sources in different directories
/// never share an object. A source outside the source root gets a
/// path-hash prefix at the build dir top level instead.
fn object_path(build_path: &Path, source_root: &Path, source: &Path, extension: &str) -> Option<PathBuf> {
	let mut name = source.file_stem()?.to_os_string();
	name.push(extension);
	match source.strip_prefix(source_root) {
		Ok(rel) => match rel.parent() {
			Some(parent) => Some(build_path.join(parent).join(name)),
			None => Some(build_path.join(name)),
		},
		Err(_) => {
			let mut hasher = Sha256::new();
			hasher.update(source.to_string_lossy().as_bytes());
			let digest = hex::encode(hasher.finalize());
			let mut prefixed = OsString::from(&digest[..12]);
			prefixed.push("-");
			prefixed.push(name);
			Some(build_path.join(prefixed))
		}
	}
}
