use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use crate::{
	compile::{flavor::Flavor, Artifact, ArtifactKind},
	target::{self, BuildContext, BuildFuture, BuildPhase, TargetCore},
};

/// A static or shared library. With no translation units among its sources
/// it degrades to a header-only library: nothing is compiled or archived,
/// only its usage requirements propagate to dependents.
#[derive(Debug)]
pub struct Library {
	core: TargetCore,
	out_dir: PathBuf,
	shared: bool,
}

impl Library {
	pub fn new(name: &str, source_path: &Path, build_path: &Path, out_dir: &Path, shared: bool) -> Arc<Library> {
		Arc::new(Library {
			core: TargetCore::new(name, source_path, build_path),
			out_dir: out_dir.to_owned(),
			shared,
		})
	}

	pub fn core(&self) -> &TargetCore {
		&self.core
	}

	pub fn is_shared(&self) -> bool {
		self.shared
	}

	/// Where the artifact lands; dependents add this as a library dir.
	pub fn output_dir(&self) -> &Path {
		&self.out_dir
	}

	pub fn is_header_only(&self) -> bool {
		self.core.compile_sources().is_empty()
	}

	pub fn artifact_name(&self, flavor: &dyn Flavor) -> String {
		if self.shared {
			flavor.shared_lib_name(self.core.name())
		} else {
			flavor.static_lib_name(self.core.name())
		}
	}

	pub fn artifact_path(&self, flavor: &dyn Flavor) -> PathBuf {
		self.out_dir.join(self.artifact_name(flavor))
	}

	/// Builds this library once per process. The state lock is held for the
	/// whole build, so concurrent dependents all wait for one outcome; later
	/// calls return the memoized result immediately.
	pub fn build(self: Arc<Self>, ctx: Arc<BuildContext>) -> BuildFuture {
		Box::pin(async move {
			let mut state = self.core.state().lock().await;
			if let BuildPhase::Built(rebuilt) = *state {
				return Ok(rebuilt);
			}
			let dep_rebuilt = target::build_dependencies(&self.core, &ctx).await?;
			let rebuilt = if self.is_header_only() {
				log::debug!("{} is header-only, nothing to compile", self.core.name());
				dep_rebuilt
			} else {
				let artifact = Artifact {
					kind: if self.shared {
						ArtifactKind::SharedLib
					} else {
						ArtifactKind::StaticLib
					},
					path: self.artifact_path(ctx.driver.flavor()),
				};
				let pic = self.shared || ctx.pic;
				ctx.driver
					.compile(&self.core, Some(artifact), pic, ctx.force, dep_rebuilt)
					.await?
			};
			*state = BuildPhase::Built(rebuilt);
			Ok(rebuilt)
		})
	}
}
