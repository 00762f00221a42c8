use core::cmp;
use std::{
	path::PathBuf, //
	sync::Arc,
};

use crate::{
	library::Library,
	package::PackageLibrary,
	target::{BuildContext, BuildFuture},
};

/// What a target may link against: a library built here, a resolved
/// external package, or a bare system library name.
#[derive(Clone, Debug)]
pub enum LinkPtr {
	Library(Arc<Library>),
	Package(Arc<PackageLibrary>),
	System(String),
}

impl cmp::PartialEq for LinkPtr {
	fn eq(&self, other: &LinkPtr) -> bool {
		match (self, other) {
			(Self::Library(a), Self::Library(b)) => Arc::ptr_eq(a, b),
			(Self::Package(a), Self::Package(b)) => Arc::ptr_eq(a, b),
			(Self::System(a), Self::System(b)) => a == b,
			_ => false,
		}
	}
}
impl cmp::Eq for LinkPtr {}

impl LinkPtr {
	pub fn name(&self) -> String {
		match self {
			Self::Library(x) => x.core().name().to_owned(),
			Self::Package(x) => x.name.clone(),
			Self::System(x) => x.clone(),
		}
	}

	pub fn build(&self, ctx: Arc<BuildContext>) -> BuildFuture {
		match self {
			Self::Library(x) => Arc::clone(x).build(ctx),
			// Nothing to do; packages and system libraries arrive prebuilt.
			Self::Package(_) | Self::System(_) => Box::pin(std::future::ready(Ok(false))),
		}
	}

	// The collect methods walk the link graph transitively. The visited
	// list both deduplicates diamonds and stops on cycles, so a malformed
	// graph degrades into an error at link time instead of looping here.

	pub(crate) fn collect_include_dirs(&self, out: &mut Vec<PathBuf>, visited: &mut Vec<LinkPtr>) {
		if visited.contains(self) {
			return;
		}
		visited.push(self.clone());
		match self {
			Self::Library(x) => {
				out.extend(x.core().attrs().include_dirs.absolute());
				for link in x.core().link_libraries() {
					link.collect_include_dirs(out, visited);
				}
			}
			Self::Package(x) => out.extend(x.include_dirs.iter().cloned()),
			Self::System(_) => {}
		}
	}

	pub(crate) fn collect_definitions(&self, out: &mut Vec<(String, Option<String>)>, visited: &mut Vec<LinkPtr>) {
		if visited.contains(self) {
			return;
		}
		visited.push(self.clone());
		match self {
			Self::Library(x) => {
				out.extend(x.core().attrs().compile_definitions.iter().cloned());
				for link in x.core().link_libraries() {
					link.collect_definitions(out, visited);
				}
			}
			Self::Package(x) => out.extend(x.defines.iter().cloned()),
			Self::System(_) => {}
		}
	}

	pub(crate) fn collect_options(&self, out: &mut Vec<String>, visited: &mut Vec<LinkPtr>) {
		if visited.contains(self) {
			return;
		}
		visited.push(self.clone());
		if let Self::Library(x) = self {
			out.extend(x.core().attrs().compile_options.iter().cloned());
			for link in x.core().link_libraries() {
				link.collect_options(out, visited);
			}
		}
	}

	pub(crate) fn collect_library_dirs(&self, out: &mut Vec<PathBuf>, visited: &mut Vec<LinkPtr>) {
		if visited.contains(self) {
			return;
		}
		visited.push(self.clone());
		match self {
			Self::Library(x) => {
				if !x.is_header_only() {
					out.push(x.output_dir().to_owned());
				}
				out.extend(x.core().attrs().library_dirs.absolute());
				for link in x.core().link_libraries() {
					link.collect_library_dirs(out, visited);
				}
			}
			Self::Package(x) => out.extend(x.library_dirs.iter().cloned()),
			Self::System(_) => {}
		}
	}

	/// Dependents come before their dependencies, the order a single-pass
	/// static linker resolves symbols in.
	pub(crate) fn collect_link_names(&self, out: &mut Vec<String>, visited: &mut Vec<LinkPtr>) {
		if visited.contains(self) {
			return;
		}
		visited.push(self.clone());
		match self {
			Self::Library(x) => {
				if !x.is_header_only() {
					out.push(x.core().name().to_owned());
				}
				for link in x.core().link_libraries() {
					link.collect_link_names(out, visited);
				}
			}
			Self::Package(x) => {
				out.extend(x.libraries.iter().cloned());
				out.extend(x.system.iter().cloned());
			}
			Self::System(x) => out.push(x.clone()),
		}
	}
}
