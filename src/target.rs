use std::{
	future::Future,
	path::{Path, PathBuf},
	pin::Pin,
	sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio::sync::Mutex;

use crate::{
	compile::{flavor::Flavor, Driver},
	error::Error,
	events::Generator,
	executable::Executable,
	library::Library,
	link_type::LinkPtr,
	misc,
	paths::PathSet,
};

/// Build progress of one target. `Built(true)` means the build changed the
/// artifact, so dependents must relink against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildPhase {
	Unbuilt,
	Built(bool),
}

/// Everything shared by one whole build invocation.
pub struct BuildContext {
	pub driver: Arc<Driver>,
	pub force: bool,
	pub pic: bool,
}

pub type BuildFuture = Pin<Box<dyn Future<Output = Result<bool, Error>> + Send>>;

/// The mutable surface of a target. Attributes may keep changing after the
/// target is declared (manifest loading appends to them in several passes),
/// so builds read them only at the moment the target is first built.
#[derive(Debug)]
pub struct TargetAttrs {
	pub sources: PathSet,
	pub include_dirs: PathSet,
	pub library_dirs: PathSet,
	pub link_libraries: Vec<LinkPtr>,
	pub compile_options: Vec<String>,
	pub compile_definitions: Vec<(String, Option<String>)>,
	/// Additional files this target depends on. Generator events attached
	/// here run before the target's sources are staleness-checked.
	pub dependencies: PathSet,
	pub install: bool,
}

impl TargetAttrs {
	fn new(source_path: &Path) -> TargetAttrs {
		TargetAttrs {
			sources: PathSet::new(source_path),
			include_dirs: PathSet::new(source_path),
			library_dirs: PathSet::new(source_path),
			link_libraries: Vec::new(),
			compile_options: Vec::new(),
			compile_definitions: Vec::new(),
			dependencies: PathSet::new(source_path),
			install: false,
		}
	}
}

/// State common to libraries and executables: identity, roots, attributes
/// and the memoizing build-state lock.
#[derive(Debug)]
pub struct TargetCore {
	name: String,
	source_path: PathBuf,
	build_path: PathBuf,
	attrs: RwLock<TargetAttrs>,
	state: Mutex<BuildPhase>,
}

impl TargetCore {
	pub fn new(name: &str, source_path: &Path, build_path: &Path) -> TargetCore {
		TargetCore {
			name: name.to_owned(),
			source_path: source_path.to_owned(),
			build_path: build_path.to_owned(),
			attrs: RwLock::new(TargetAttrs::new(source_path)),
			state: Mutex::new(BuildPhase::Unbuilt),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn source_path(&self) -> &Path {
		&self.source_path
	}

	pub fn build_path(&self) -> &Path {
		&self.build_path
	}

	pub fn attrs(&self) -> RwLockReadGuard<'_, TargetAttrs> {
		self.attrs.read().unwrap_or_else(|e| e.into_inner())
	}

	pub fn attrs_mut(&self) -> RwLockWriteGuard<'_, TargetAttrs> {
		self.attrs.write().unwrap_or_else(|e| e.into_inner())
	}

	pub(crate) fn state(&self) -> &Mutex<BuildPhase> {
		&self.state
	}

	pub fn install(&self) -> bool {
		self.attrs().install
	}

	/// The sources actually fed to the compiler. Headers may sit in
	/// `sources` too (they take part in install), but are never compiled.
	pub fn compile_sources(&self) -> Vec<PathBuf> {
		self.attrs()
			.sources
			.absolute()
			.into_iter()
			.filter(|p| misc::is_translation_unit(p))
			.collect()
	}

	pub fn public_headers(&self) -> Vec<PathBuf> {
		self.attrs()
			.sources
			.absolute()
			.into_iter()
			.filter(|p| misc::is_header(&p.to_string_lossy()))
			.collect()
	}

	pub fn link_libraries(&self) -> Vec<LinkPtr> {
		self.attrs().link_libraries.clone()
	}

	/// Generator hooks pending for this target, from both the source set
	/// and the extra dependency set.
	pub fn generators(&self) -> Vec<Arc<Generator>> {
		let attrs = self.attrs();
		let mut out: Vec<Arc<Generator>> = Vec::new();
		for generator in attrs.sources.events().iter().chain(attrs.dependencies.events()) {
			if !out.iter().any(|x| Arc::ptr_eq(x, generator)) {
				out.push(Arc::clone(generator));
			}
		}
		out
	}

	/// Own include dirs followed by the public include dirs of every link
	/// dependency, transitively, first occurrence wins.
	pub fn effective_include_dirs(&self) -> Vec<PathBuf> {
		let mut out = self.attrs().include_dirs.absolute();
		let mut visited = Vec::new();
		for link in self.link_libraries() {
			link.collect_include_dirs(&mut out, &mut visited);
		}
		dedup_paths(&mut out);
		out
	}

	pub fn effective_definitions(&self) -> Vec<(String, Option<String>)> {
		let mut out = self.attrs().compile_definitions.clone();
		let mut visited = Vec::new();
		for link in self.link_libraries() {
			link.collect_definitions(&mut out, &mut visited);
		}
		out.dedup();
		let mut seen: Vec<String> = Vec::new();
		out.retain(|(name, _)| {
			if seen.iter().any(|x| x == name) {
				false
			} else {
				seen.push(name.clone());
				true
			}
		});
		out
	}

	pub fn effective_options(&self) -> Vec<String> {
		let mut out = self.attrs().compile_options.clone();
		let mut visited = Vec::new();
		for link in self.link_libraries() {
			link.collect_options(&mut out, &mut visited);
		}
		let mut seen: Vec<String> = Vec::new();
		out.retain(|opt| {
			if seen.iter().any(|x| x == opt) {
				false
			} else {
				seen.push(opt.clone());
				true
			}
		});
		out
	}

	pub fn effective_library_dirs(&self) -> Vec<PathBuf> {
		let mut out = self.attrs().library_dirs.absolute();
		let mut visited = Vec::new();
		for link in self.link_libraries() {
			link.collect_library_dirs(&mut out, &mut visited);
		}
		dedup_paths(&mut out);
		out
	}

	/// Names passed to the linker, dependents before their dependencies,
	/// the order static linking wants.
	pub fn link_names(&self) -> Vec<String> {
		let mut out = Vec::new();
		let mut visited = Vec::new();
		for link in self.link_libraries() {
			link.collect_link_names(&mut out, &mut visited);
		}
		let mut seen: Vec<String> = Vec::new();
		out.retain(|name| {
			if seen.iter().any(|x| x == name) {
				false
			} else {
				seen.push(name.clone());
				true
			}
		});
		out
	}
}

/// Builds every link dependency of `core` (siblings concurrently), then
/// runs its pending generator hooks. Returns whether any dependency
/// artifact changed. Every spawned build is awaited even after a failure.
pub(crate) async fn build_dependencies(core: &TargetCore, ctx: &Arc<BuildContext>) -> Result<bool, Error> {
	let mut builds: tokio::task::JoinSet<Result<bool, Error>> = tokio::task::JoinSet::new();
	for link in core.link_libraries() {
		let ctx = Arc::clone(ctx);
		builds.spawn(link.build(ctx));
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
	if let Some(e) = first_error {
		return Err(e);
	}
	for generator in core.generators() {
		generator.ensure_run().await?;
	}
	Ok(rebuilt)
}

fn dedup_paths(paths: &mut Vec<PathBuf>) {
	let mut seen: Vec<PathBuf> = Vec::new();
	paths.retain(|p| {
		if seen.iter().any(|x| x == p) {
			false
		} else {
			seen.push(p.clone());
			true
		}
	});
}

/// Any buildable target in a project.
#[derive(Clone, Debug)]
pub enum TargetPtr {
	Library(Arc<Library>),
	Executable(Arc<Executable>),
}

impl TargetPtr {
	pub fn name(&self) -> &str {
		match self {
			Self::Library(x) => x.core().name(),
			Self::Executable(x) => x.core().name(),
		}
	}

	pub fn core(&self) -> &TargetCore {
		match self {
			Self::Library(x) => x.core(),
			Self::Executable(x) => x.core(),
		}
	}

	pub fn build(&self, ctx: Arc<BuildContext>) -> BuildFuture {
		match self {
			Self::Library(x) => Arc::clone(x).build(ctx),
			Self::Executable(x) => Arc::clone(x).build(ctx),
		}
	}

	pub fn artifact_path(&self, flavor: &dyn Flavor) -> Option<PathBuf> {
		match self {
			Self::Library(x) => {
				if x.is_header_only() {
					None
				} else {
					Some(x.artifact_path(flavor))
				}
			}
			Self::Executable(x) => Some(x.artifact_path(flavor)),
		}
	}
}
