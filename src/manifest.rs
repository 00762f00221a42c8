use std::{
	fs,
	path::{Path, PathBuf},
	sync::Arc,
};

use serde::Deserialize;

use crate::{
	error::Error,
	link_type::LinkPtr,
	paths,
	project::Project,
	target::{TargetCore, TargetPtr},
};

pub const MANIFEST_NAME: &str = "ballista.toml";

/// The declarative project description. One `ballista.toml` per project;
/// subproject entries point at directories holding their own manifest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestFile {
	pub name: String,
	pub version: String,
	#[serde(default)]
	pub requires: Vec<String>,
	#[serde(default)]
	pub subprojects: Vec<PathBuf>,
	#[serde(default, rename = "library")]
	pub libraries: Vec<LibraryEntry>,
	#[serde(default, rename = "executable")]
	pub executables: Vec<ExecutableEntry>,
	#[serde(default)]
	pub main_library: Option<String>,
	#[serde(default)]
	pub main_executable: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LibraryEntry {
	pub name: String,
	/// Paths or glob patterns, relative to the project root.
	#[serde(default)]
	pub sources: Vec<String>,
	#[serde(default)]
	pub include_dirs: Vec<PathBuf>,
	#[serde(default)]
	pub library_dirs: Vec<PathBuf>,
	/// Target names, `requires` entries, or system library names; told
	/// apart only once the whole tree is loaded.
	#[serde(default)]
	pub links: Vec<String>,
	#[serde(default)]
	pub compile_options: Vec<String>,
	/// `NAME` or `NAME=VALUE`.
	#[serde(default)]
	pub defines: Vec<String>,
	#[serde(default)]
	pub shared: bool,
	#[serde(default)]
	pub install: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutableEntry {
	pub name: String,
	#[serde(default)]
	pub sources: Vec<String>,
	#[serde(default)]
	pub include_dirs: Vec<PathBuf>,
	#[serde(default)]
	pub library_dirs: Vec<PathBuf>,
	#[serde(default)]
	pub links: Vec<String>,
	#[serde(default)]
	pub compile_options: Vec<String>,
	#[serde(default)]
	pub defines: Vec<String>,
	#[serde(default)]
	pub test: bool,
	#[serde(default)]
	pub install: bool,
}

pub fn read_manifest(path: &Path) -> Result<ManifestFile, Error> {
	let content = match fs::read_to_string(path) {
		Ok(x) => x,
		Err(e) => {
			return Err(Error::Manifest {
				path: path.to_owned(),
				message: e.to_string(),
			})
		}
	};
	match toml::from_str::<ManifestFile>(&content) {
		Ok(x) => Ok(x),
		Err(e) => Err(Error::Manifest {
			path: path.to_owned(),
			message: e.to_string(),
		}),
	}
}

/// Loads the manifest at `source_path` and its whole subproject tree into
/// a populated project graph. Link names resolve in a second pass, so a
/// target may link a sibling declared after it or one in a subproject.
pub fn load_project(source_path: &Path, build_path: &Path) -> Result<Arc<Project>, Error> {
	let file = read_manifest(&source_path.join(MANIFEST_NAME))?;
	let root = Project::new(&file.name, &file.version, source_path, build_path, file.requires.clone());
	let mut pending: Vec<(TargetPtr, Vec<String>)> = Vec::new();
	populate(&root, &file, &mut pending)?;
	for (target, links) in pending {
		for name in links {
			let link = match root.target(&name) {
				Some(TargetPtr::Library(lib)) => LinkPtr::Library(lib),
				Some(other) => return Err(Error::NotLinkable(other.name().to_owned())),
				// A requires entry (resolved later) or a system library.
				None => LinkPtr::System(name),
			};
			target.core().attrs_mut().link_libraries.push(link);
		}
	}
	Ok(root)
}

fn populate(project: &Arc<Project>, file: &ManifestFile, pending: &mut Vec<(TargetPtr, Vec<String>)>) -> Result<(), Error> {
	for entry in &file.libraries {
		let lib = project.add_library(&entry.name, entry.shared)?;
		fill_attrs(
			lib.core(),
			&entry.sources,
			&entry.include_dirs,
			&entry.library_dirs,
			&entry.compile_options,
			&entry.defines,
			entry.install,
		)?;
		pending.push((TargetPtr::Library(Arc::clone(&lib)), entry.links.clone()));
	}
	for entry in &file.executables {
		let exe = project.add_executable(&entry.name, entry.test)?;
		fill_attrs(
			exe.core(),
			&entry.sources,
			&entry.include_dirs,
			&entry.library_dirs,
			&entry.compile_options,
			&entry.defines,
			entry.install,
		)?;
		pending.push((TargetPtr::Executable(Arc::clone(&exe)), entry.links.clone()));
	}
	if let Some(name) = &file.main_library {
		match project.targets().into_iter().find(|t| t.name() == name.as_str()) {
			Some(TargetPtr::Library(lib)) => project.set_main_library(lib)?,
			_ => return Err(Error::UnknownTarget(name.clone())),
		}
	}
	if let Some(name) = &file.main_executable {
		match project.targets().into_iter().find(|t| t.name() == name.as_str()) {
			Some(TargetPtr::Executable(exe)) => project.set_main_executable(exe)?,
			_ => return Err(Error::UnknownTarget(name.clone())),
		}
	}
	for rel in &file.subprojects {
		let sub_src = paths::normalize(&project.source_path().join(rel));
		let sub_file = read_manifest(&sub_src.join(MANIFEST_NAME))?;
		let sub = project.add_subproject(&sub_file.name, &sub_file.version, &sub_src, sub_file.requires.clone());
		populate(&sub, &sub_file, pending)?;
	}
	Ok(())
}

fn fill_attrs(
	core: &TargetCore,
	sources: &[String],
	include_dirs: &[PathBuf],
	library_dirs: &[PathBuf],
	compile_options: &[String],
	defines: &[String],
	install: bool,
) -> Result<(), Error> {
	let mut attrs = core.attrs_mut();
	for pattern in sources {
		if pattern.contains(['*', '?', '[']) {
			attrs.sources.glob(pattern)?;
		} else {
			attrs.sources.append(pattern);
		}
	}
	for dir in include_dirs {
		attrs.include_dirs.append(dir);
	}
	for dir in library_dirs {
		attrs.library_dirs.append(dir);
	}
	attrs.compile_options.extend(compile_options.iter().cloned());
	for define in defines {
		let parsed = match define.split_once('=') {
			Some((name, value)) => (name.to_owned(), Some(value.to_owned())),
			None => (define.clone(), None),
		};
		attrs.compile_definitions.push(parsed);
	}
	attrs.install = install;
	Ok(())
}
