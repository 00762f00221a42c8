use std::{
	env,
	path::{Path, PathBuf},
	sync::Arc,
};

use crate::{
	compile::{flavor::Flavor, Artifact, ArtifactKind},
	error::{Error, ProcessError},
	target::{self, BuildContext, BuildFuture, BuildPhase, TargetCore},
};

#[derive(Debug)]
pub struct Executable {
	core: TargetCore,
	out_dir: PathBuf,
	is_test: bool,
}

impl Executable {
	pub fn new(name: &str, source_path: &Path, build_path: &Path, out_dir: &Path, is_test: bool) -> Arc<Executable> {
		Arc::new(Executable {
			core: TargetCore::new(name, source_path, build_path),
			out_dir: out_dir.to_owned(),
			is_test,
		})
	}

	pub fn core(&self) -> &TargetCore {
		&self.core
	}

	pub fn is_test(&self) -> bool {
		self.is_test
	}

	pub fn output_dir(&self) -> &Path {
		&self.out_dir
	}

	pub fn artifact_path(&self, flavor: &dyn Flavor) -> PathBuf {
		self.out_dir.join(flavor.executable_name(self.core.name()))
	}

	pub fn build(self: Arc<Self>, ctx: Arc<BuildContext>) -> BuildFuture {
		Box::pin(async move {
			let mut state = self.core.state().lock().await;
			if let BuildPhase::Built(rebuilt) = *state {
				return Ok(rebuilt);
			}
			let dep_rebuilt = target::build_dependencies(&self.core, &ctx).await?;
			let artifact = Artifact {
				kind: ArtifactKind::Executable,
				path: self.artifact_path(ctx.driver.flavor()),
			};
			let rebuilt = ctx
				.driver
				.compile(&self.core, Some(artifact), ctx.pic, ctx.force, dep_rebuilt)
				.await?;
			*state = BuildPhase::Built(rebuilt);
			Ok(rebuilt)
		})
	}

	/// Runs the built artifact with stdio inherited, the artifact lib dir
	/// prepended to the dynamic loader's search path. Returns the child's
	/// exit code; a non-zero exit is not an error here, the caller decides.
	pub async fn run(&self, flavor: &dyn Flavor, lib_dir: &Path, args: &[String]) -> Result<i32, Error> {
		let path = self.artifact_path(flavor);
		let var = flavor.loader_path_var();
		let mut search = vec![lib_dir.to_owned()];
		search.extend(env::split_paths(&env::var_os(var).unwrap_or_default()));
		let search = env::join_paths(search).map_err(|e| Error::Task(e.to_string()))?;

		log::info!("running {}", path.display());
		let status = tokio::process::Command::new(&path)
			.args(args)
			.env(var, search)
			.status()
			.await
			.map_err(|e| ProcessError {
				command: path.to_string_lossy().into_owned(),
				status: None,
				stderr: e.to_string(),
			})?;
		Ok(status.code().unwrap_or(1))
	}
}
