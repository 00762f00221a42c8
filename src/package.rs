use std::{path::PathBuf, sync::Arc};

/// The usage requirements of a prebuilt external package. How the package
/// got onto the machine is someone else's business; this is only the
/// surface a target needs to compile and link against it.
#[derive(Debug, Default)]
pub struct PackageLibrary {
	pub name: String,
	pub include_dirs: Vec<PathBuf>,
	pub library_dirs: Vec<PathBuf>,
	pub libraries: Vec<String>,
	/// Names linked as plain system libraries, after `libraries`.
	pub system: Vec<String>,
	pub defines: Vec<(String, Option<String>)>,
}

/// Resolves a `requires` entry to a package. Implementations range from a
/// hard-coded map in tests to a lookup against an installed package store.
pub trait PackageProvider: Send + Sync {
	fn resolve(&self, name: &str) -> Option<Arc<PackageLibrary>>;
}
