use std::path::{Path, PathBuf};

use crate::error::Error;

/// Where a project keeps each kind of file, relative to its root.
#[derive(Clone, Debug)]
pub struct Layout {
	pub sources: PathBuf,
	/// Directories holding public headers; all collapse into the first
	/// include directory of the destination layout on conversion.
	pub includes: Vec<PathBuf>,
	pub binaries: PathBuf,
	pub libraries: PathBuf,
}

impl Default for Layout {
	fn default() -> Layout {
		Layout {
			sources: PathBuf::from("src"),
			includes: vec![PathBuf::from("include"), PathBuf::from("inline")],
			binaries: PathBuf::from("bin"),
			libraries: PathBuf::from("lib"),
		}
	}
}

impl Layout {
	/// The layout of an installed tree.
	pub fn dist() -> Layout {
		Layout {
			sources: PathBuf::from("src"),
			includes: vec![PathBuf::from("include")],
			binaries: PathBuf::from("bin"),
			libraries: PathBuf::from("lib"),
		}
	}
}

enum Category {
	Sources,
	Includes,
	Binaries,
	Libraries,
}

/// Maps root-relative paths from one layout to another, for the install
/// step. Paths outside every category are an error, not silently skipped.
pub struct LayoutConverter {
	pub source: Layout,
	pub dest: Layout,
}

impl LayoutConverter {
	pub fn new(source: Layout, dest: Layout) -> LayoutConverter {
		LayoutConverter { source, dest }
	}

	fn classify<'a>(&self, rel: &'a Path) -> Option<(Category, &'a Path)> {
		for dir in &self.source.includes {
			if let Ok(rest) = rel.strip_prefix(dir) {
				return Some((Category::Includes, rest));
			}
		}
		if let Ok(rest) = rel.strip_prefix(&self.source.sources) {
			return Some((Category::Sources, rest));
		}
		if let Ok(rest) = rel.strip_prefix(&self.source.binaries) {
			return Some((Category::Binaries, rest));
		}
		if let Ok(rest) = rel.strip_prefix(&self.source.libraries) {
			return Some((Category::Libraries, rest));
		}
		None
	}

	pub fn convert(&self, rel: &Path) -> Result<PathBuf, Error> {
		let (category, rest) = match self.classify(rel) {
			Some(x) => x,
			None => return Err(Error::UnmappedPath(rel.to_owned())),
		};
		let root = match category {
			Category::Sources => &self.dest.sources,
			Category::Includes => match self.dest.includes.first() {
				Some(x) => x,
				None => return Err(Error::UnmappedPath(rel.to_owned())),
			},
			Category::Binaries => &self.dest.binaries,
			Category::Libraries => &self.dest.libraries,
		};
		Ok(root.join(rest))
	}
}
