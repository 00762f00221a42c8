use core::fmt;
use std::{
	future::Future,
	path::PathBuf,
	pin::Pin,
	sync::Arc,
};

use tokio::sync::Mutex;

use crate::error::Error;

pub type GeneratorFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// A pre-build code-generation hook. It declares the files it will produce
/// and a callable that produces them. A target whose `dependencies` path set
/// carries a generator will not compile before the generator has executed
/// and its declared outputs exist on disk.
pub struct Generator {
	name: String,
	outputs: Vec<PathBuf>,
	func: Box<dyn Fn() -> GeneratorFuture + Send + Sync>,
	executed: Mutex<bool>,
}

impl Generator {
	pub fn new<F>(name: impl Into<String>, outputs: Vec<PathBuf>, func: F) -> Arc<Self>
	where
		F: Fn() -> GeneratorFuture + Send + Sync + 'static,
	{
		Arc::new(Generator {
			name: name.into(),
			outputs,
			func: Box::new(func),
			executed: Mutex::new(false),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn outputs(&self) -> &[PathBuf] {
		&self.outputs
	}

	/// Runs the hook if it has not run yet in this process. Concurrent
	/// callers collapse into one execution; later callers see the result.
	pub async fn ensure_run(&self) -> Result<(), Error> {
		let mut executed = self.executed.lock().await;
		if *executed {
			return Ok(());
		}
		log::info!("running generator {}", self.name);
		(self.func)().await?;
		for output in &self.outputs {
			if !output.exists() {
				return Err(Error::GeneratorOutput {
					name: self.name.clone(),
					output: output.clone(),
				});
			}
		}
		*executed = true;
		Ok(())
	}
}

impl fmt::Debug for Generator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Generator")
			.field("name", &self.name)
			.field("outputs", &self.outputs)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	fn counting_generator(dir: &std::path::Path, produce: bool) -> (Arc<Generator>, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let out = dir.join("gen.hpp");
		let gen = Generator::new("gen_header", vec![out.clone()], {
			let calls = Arc::clone(&calls);
			move || {
				calls.fetch_add(1, Ordering::SeqCst);
				let out = out.clone();
				Box::pin(async move {
					if produce {
						std::fs::write(&out, "#pragma once\n")?;
					}
					Ok(())
				}) as GeneratorFuture
			}
		});
		(gen, calls)
	}

	#[tokio::test]
	async fn generator_runs_at_most_once() {
		let dir = tempfile::tempdir().unwrap();
		let (gen, calls) = counting_generator(dir.path(), true);
		gen.ensure_run().await.unwrap();
		gen.ensure_run().await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(dir.path().join("gen.hpp").exists());
	}

	#[tokio::test]
	async fn missing_declared_output_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let (gen, _) = counting_generator(dir.path(), false);
		match gen.ensure_run().await {
			Err(Error::GeneratorOutput { name, .. }) => assert_eq!(name, "gen_header"),
			other => panic!("expected GeneratorOutput error, got {:?}", other.map(|_| ())),
		}
	}
}
