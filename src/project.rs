use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
	sync::{Arc, Mutex, RwLock, Weak},
};

use tokio::task::JoinSet;

use crate::{
	error::Error,
	executable::Executable,
	layout::{Layout, LayoutConverter},
	library::Library,
	link_type::LinkPtr,
	package::PackageProvider,
	target::{BuildContext, TargetPtr},
};

/// Target names are unique across a whole project tree. The root project
/// owns one registry and every subproject shares it, so a collision
/// anywhere in the tree is rejected at declaration time.
#[derive(Debug, Default)]
pub struct TargetRegistry {
	names: Mutex<HashSet<String>>,
}

impl TargetRegistry {
	fn register(&self, name: &str) -> Result<(), Error> {
		let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
		if !names.insert(name.to_owned()) {
			return Err(Error::DuplicateTarget(name.to_owned()));
		}
		Ok(())
	}
}

#[derive(Debug)]
pub struct Project {
	name: String,
	version: String,
	source_path: PathBuf,
	build_path: PathBuf,
	out_bin: PathBuf,
	out_lib: PathBuf,
	requires: Vec<String>,
	registry: Arc<TargetRegistry>,
	parent: Weak<Project>,
	libraries: RwLock<Vec<Arc<Library>>>,
	executables: RwLock<Vec<Arc<Executable>>>,
	subprojects: RwLock<Vec<Arc<Project>>>,
	main_library: RwLock<Option<Arc<Library>>>,
	main_executable: RwLock<Option<Arc<Executable>>>,
}

impl Project {
	pub fn new(name: &str, version: &str, source_path: &Path, build_path: &Path, requires: Vec<String>) -> Arc<Project> {
		Arc::new(Project {
			name: name.to_owned(),
			version: version.to_owned(),
			source_path: source_path.to_owned(),
			build_path: build_path.to_owned(),
			out_bin: build_path.join("bin"),
			out_lib: build_path.join("lib"),
			requires,
			registry: Arc::new(TargetRegistry::default()),
			parent: Weak::new(),
			libraries: RwLock::new(Vec::new()),
			executables: RwLock::new(Vec::new()),
			subprojects: RwLock::new(Vec::new()),
			main_library: RwLock::new(None),
			main_executable: RwLock::new(None),
		})
	}

	/// Subprojects share the root's registry and artifact dirs, so the
	/// whole tree links out of one `lib/` and installs out of one `bin/`.
	pub fn add_subproject(
		self: &Arc<Self>,
		name: &str,
		version: &str,
		source_path: &Path,
		requires: Vec<String>,
	) -> Arc<Project> {
		let sub = Arc::new(Project {
			name: name.to_owned(),
			version: version.to_owned(),
			source_path: source_path.to_owned(),
			build_path: self.build_path.join(name),
			out_bin: self.out_bin.clone(),
			out_lib: self.out_lib.clone(),
			requires,
			registry: Arc::clone(&self.registry),
			parent: Arc::downgrade(self),
			libraries: RwLock::new(Vec::new()),
			executables: RwLock::new(Vec::new()),
			subprojects: RwLock::new(Vec::new()),
			main_library: RwLock::new(None),
			main_executable: RwLock::new(None),
		});
		self.subprojects
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.push(Arc::clone(&sub));
		sub
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn version(&self) -> &str {
		&self.version
	}

	pub fn source_path(&self) -> &Path {
		&self.source_path
	}

	pub fn build_path(&self) -> &Path {
		&self.build_path
	}

	pub fn bin_dir(&self) -> &Path {
		&self.out_bin
	}

	pub fn lib_dir(&self) -> &Path {
		&self.out_lib
	}

	pub fn parent(&self) -> Option<Arc<Project>> {
		self.parent.upgrade()
	}

	pub fn add_library(self: &Arc<Self>, name: &str, shared: bool) -> Result<Arc<Library>, Error> {
		self.registry.register(name)?;
		let lib = Library::new(name, &self.source_path, &self.build_path.join(name), &self.out_lib, shared);
		self.libraries
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.push(Arc::clone(&lib));
		Ok(lib)
	}

	pub fn add_executable(self: &Arc<Self>, name: &str, is_test: bool) -> Result<Arc<Executable>, Error> {
		self.registry.register(name)?;
		let exe = Executable::new(name, &self.source_path, &self.build_path.join(name), &self.out_bin, is_test);
		self.executables
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.push(Arc::clone(&exe));
		Ok(exe)
	}

	/// A project exposes either a main library or a main executable to its
	/// consumers, never both.
	pub fn set_main_library(&self, lib: Arc<Library>) -> Result<(), Error> {
		if self.main_executable.read().unwrap_or_else(|e| e.into_inner()).is_some() {
			return Err(Error::MainTargetConflict(self.name.clone()));
		}
		*self.main_library.write().unwrap_or_else(|e| e.into_inner()) = Some(lib);
		Ok(())
	}

	pub fn set_main_executable(&self, exe: Arc<Executable>) -> Result<(), Error> {
		if self.main_library.read().unwrap_or_else(|e| e.into_inner()).is_some() {
			return Err(Error::MainTargetConflict(self.name.clone()));
		}
		*self.main_executable.write().unwrap_or_else(|e| e.into_inner()) = Some(exe);
		Ok(())
	}

	pub fn main_library(&self) -> Option<Arc<Library>> {
		self.main_library.read().unwrap_or_else(|e| e.into_inner()).clone()
	}

	pub fn main_executable(&self) -> Option<Arc<Executable>> {
		self.main_executable.read().unwrap_or_else(|e| e.into_inner()).clone()
	}

	/// This project's own targets, declaration order, libraries first.
	pub fn targets(&self) -> Vec<TargetPtr> {
		let mut out: Vec<TargetPtr> = Vec::new();
		for lib in self.libraries.read().unwrap_or_else(|e| e.into_inner()).iter() {
			out.push(TargetPtr::Library(Arc::clone(lib)));
		}
		for exe in self.executables.read().unwrap_or_else(|e| e.into_inner()).iter() {
			out.push(TargetPtr::Executable(Arc::clone(exe)));
		}
		out
	}

	pub fn subprojects(&self) -> Vec<Arc<Project>> {
		self.subprojects.read().unwrap_or_else(|e| e.into_inner()).clone()
	}

	fn collect_targets(&self, out: &mut Vec<TargetPtr>) {
		out.extend(self.targets());
		for sub in self.subprojects() {
			sub.collect_targets(out);
		}
	}

	pub fn all_targets(&self) -> Vec<TargetPtr> {
		let mut out = Vec::new();
		self.collect_targets(&mut out);
		out
	}

	/// Looks a target up by name, own targets before subprojects,
	/// subprojects depth-first in declaration order.
	pub fn target(&self, name: &str) -> Option<TargetPtr> {
		for target in self.targets() {
			if target.name() == name {
				return Some(target);
			}
		}
		for sub in self.subprojects() {
			if let Some(target) = sub.target(name) {
				return Some(target);
			}
		}
		None
	}

	fn default_executable(&self) -> Result<Arc<Executable>, Error> {
		if let Some(exe) = self.main_executable() {
			return Ok(exe);
		}
		let executables = self.executables.read().unwrap_or_else(|e| e.into_inner());
		if executables.len() == 1 {
			return Ok(Arc::clone(&executables[0]));
		}
		Err(Error::UnknownTarget("(default executable)".to_owned()))
	}

	/// Rejects link cycles before any build starts; a cycle would otherwise
	/// deadlock on the per-target build locks.
	pub fn check_cycles(&self) -> Result<(), Error> {
		fn visit(
			lib: &Arc<Library>,
			visiting: &mut Vec<*const Library>,
			done: &mut Vec<*const Library>,
		) -> Result<(), Error> {
			let ptr = Arc::as_ptr(lib);
			if done.contains(&ptr) {
				return Ok(());
			}
			if visiting.contains(&ptr) {
				return Err(Error::DependencyCycle(lib.core().name().to_owned()));
			}
			visiting.push(ptr);
			for link in lib.core().link_libraries() {
				if let LinkPtr::Library(x) = link {
					visit(&x, visiting, done)?;
				}
			}
			visiting.pop();
			done.push(ptr);
			Ok(())
		}

		let mut visiting = Vec::new();
		let mut done = Vec::new();
		for target in self.all_targets() {
			match target {
				TargetPtr::Library(x) => visit(&x, &mut visiting, &mut done)?,
				TargetPtr::Executable(x) => {
					for link in x.core().link_libraries() {
						if let LinkPtr::Library(lib) = link {
							visit(&lib, &mut visiting, &mut done)?;
						}
					}
				}
			}
		}
		Ok(())
	}

	/// Builds one named target (plus its dependencies) or, with no name,
	/// every one of this project's own targets concurrently. Subproject
	/// targets are reached only through link dependencies, never swept in.
	pub async fn build(self: &Arc<Self>, ctx: Arc<BuildContext>, target: Option<&str>) -> Result<bool, Error> {
		self.check_cycles()?;
		match target {
			Some(name) => match self.target(name) {
				Some(t) => t.build(ctx).await,
				None => Err(Error::UnknownTarget(name.to_owned())),
			},
			None => build_set(&ctx, self.targets()).await,
		}
	}

	/// Builds the whole tree, then copies installable artifacts and public
	/// headers into `dest` under the dist layout (`bin`/`lib`/`include`).
	/// Unlike `build`, this covers subprojects too.
	pub async fn install(self: &Arc<Self>, ctx: Arc<BuildContext>, dest: &Path) -> Result<(), Error> {
		self.check_cycles()?;
		build_set(&ctx, self.all_targets()).await?;
		let converter = LayoutConverter::new(Layout::default(), Layout::dist());
		for target in self.all_targets() {
			if !target.core().install() {
				continue;
			}
			if let Some(artifact) = target.artifact_path(ctx.driver.flavor()) {
				let dist = Layout::dist();
				let import_lib = match &target {
					TargetPtr::Library(lib) if lib.is_shared() => ctx.driver.flavor().import_lib(&artifact),
					_ => None,
				};
				// With an import library the shared library itself is a
				// runtime artifact and lands next to the executables;
				// dependents link the import library out of `lib/`.
				let sub = match &target {
					TargetPtr::Library(_) if import_lib.is_none() => &dist.libraries,
					_ => &dist.binaries,
				};
				copy_into(dest, sub, &artifact)?;
				if let Some(import_lib) = import_lib {
					copy_into(dest, &dist.libraries, &import_lib)?;
				}
			}
			for header in target.core().public_headers() {
				let rel = header
					.strip_prefix(target.core().source_path())
					.map_err(|_| Error::UnmappedPath(header.clone()))?;
				let to = dest.join(converter.convert(rel)?);
				if let Some(parent) = to.parent() {
					fs::create_dir_all(parent)?;
				}
				fs::copy(&header, &to)?;
			}
		}
		Ok(())
	}

	/// Builds and runs the named executable, or the project's default one.
	/// Returns the child's exit code.
	pub async fn run(
		self: &Arc<Self>,
		ctx: Arc<BuildContext>,
		target: Option<&str>,
		args: &[String],
	) -> Result<i32, Error> {
		let exe = match target {
			Some(name) => match self.target(name) {
				Some(TargetPtr::Executable(x)) => x,
				Some(_) => return Err(Error::NotAnExecutable(name.to_owned())),
				None => return Err(Error::UnknownTarget(name.to_owned())),
			},
			None => self.default_executable()?,
		};
		self.check_cycles()?;
		Arc::clone(&exe).build(Arc::clone(&ctx)).await?;
		exe.run(ctx.driver.flavor(), &self.out_lib, args).await
	}

	/// Builds and runs this project's own test executables (optionally just
	/// the named one); the first non-zero exit fails the whole run.
	pub async fn test(self: &Arc<Self>, ctx: Arc<BuildContext>, filter: Option<&str>) -> Result<(), Error> {
		let tests: Vec<Arc<Executable>> = self
			.targets()
			.into_iter()
			.filter_map(|t| match t {
				TargetPtr::Executable(x) if x.is_test() => Some(x),
				_ => None,
			})
			.filter(|x| filter.is_none() || filter == Some(x.core().name()))
			.collect();
		if tests.is_empty() {
			if let Some(name) = filter {
				return Err(Error::UnknownTarget(name.to_owned()));
			}
			log::warn!("{} has no tests", self.name);
			return Ok(());
		}
		self.check_cycles()?;
		for test in tests {
			Arc::clone(&test).build(Arc::clone(&ctx)).await?;
			let code = test.run(ctx.driver.flavor(), &self.out_lib, &[]).await?;
			if code != 0 {
				return Err(Error::TestFailed {
					name: test.core().name().to_owned(),
					code,
				});
			}
		}
		Ok(())
	}

	/// Replaces string link entries naming a `requires` entry with the
	/// package the provider resolves them to. Other string entries stay
	/// plain system libraries.
	pub fn resolve_dependencies(&self, provider: &dyn PackageProvider) -> Result<(), Error> {
		for target in self.targets() {
			let mut attrs = target.core().attrs_mut();
			for link in attrs.link_libraries.iter_mut() {
				let name = match link {
					LinkPtr::System(x) => x.clone(),
					_ => continue,
				};
				if !self.requires.iter().any(|x| x == &name) {
					continue;
				}
				match provider.resolve(&name) {
					Some(package) => *link = LinkPtr::Package(package),
					None => return Err(Error::UnknownPackage(name)),
				}
			}
		}
		for sub in self.subprojects() {
			sub.resolve_dependencies(provider)?;
		}
		Ok(())
	}
}

fn copy_into(dest: &Path, sub: &Path, from: &Path) -> Result<(), Error> {
	let name = match from.file_name() {
		Some(x) => x.to_owned(),
		None => return Err(Error::UnmappedPath(from.to_owned())),
	};
	let to = dest.join(sub).join(name);
	if let Some(parent) = to.parent() {
		fs::create_dir_all(parent)?;
	}
	log::info!("installing {}", to.display());
	fs::copy(from, &to)?;
	Ok(())
}

/// Builds a set of targets concurrently. Every spawned build is awaited
/// even after a failure; the first failure is then reported.
async fn build_set(ctx: &Arc<BuildContext>, targets: Vec<TargetPtr>) -> Result<bool, Error> {
	let mut builds: JoinSet<Result<bool, Error>> = JoinSet::new();
	for t in targets {
		builds.spawn(t.build(Arc::clone(ctx)));
	}
	let mut rebuilt = false;
	let mut first_error: Option<Error> = None;
	while let Some(joined) = builds.join_next().await {
		match joined {
			Ok(Ok(x)) => rebuilt |= x,
			Ok(Err(e)) => {
				if first_error.is_none() {
					first_error = Some(e);
				}
			}
			Err(e) => {
				if first_error.is_none() {
					first_error = Some(Error::Task(e.to_string()));
				}
			}
		}
	}
	match first_error {
		Some(e) => Err(e),
		None => Ok(rebuilt),
	}
}
