use std::{
	collections::BTreeSet,
	fs::{self, File},
	io::{self, BufRead, BufReader},
	path::{Path, PathBuf},
	time::SystemTime,
};

use sha2::{Digest, Sha256};

/// Extracts the names of syntactic `#include <...>` / `#include "..."`
/// directives. Intentionally approximate: no preprocessing, so includes
/// behind macros or conditionals are matched as written.
fn scan_includes(line: &str) -> Option<&str> {
	let rest = line.trim_start().strip_prefix("#include")?;
	let rest = rest.trim_start();
	let (open, close) = match rest.chars().next()? {
		'<' => ('<', '>'),
		'"' => ('"', '"'),
		_ => return None,
	};
	let rest = &rest[open.len_utf8()..];
	let end = rest.find(close)?;
	Some(&rest[..end])
}

/// One level of `#include` scanning for `source`, resolved against the
/// include search directories. Every directory that contains the included
/// name contributes a match, mirroring how the compiler may find it.
pub fn source_deps(source: &Path, include_dirs: &[PathBuf]) -> io::Result<BTreeSet<PathBuf>> {
	let mut deps = BTreeSet::new();
	let reader = BufReader::new(File::open(source)?);
	for line in reader.lines() {
		let line = match line {
			Ok(x) => x,
			// Not necessarily UTF-8 all the way through; skip odd lines.
			Err(_) => continue,
		};
		if let Some(include) = scan_includes(&line) {
			for dir in include_dirs {
				let full = dir.join(include);
				if full.exists() {
					deps.insert(full);
				}
			}
		}
	}
	Ok(deps)
}

/// Stable identity for one (dependency, source) pair; names the timestamp
/// marker file under `<target build dir>/deps/`.
fn marker_path(build_path: &Path, source: &Path, dep: &Path) -> PathBuf {
	let mut hasher = Sha256::new();
	hasher.update(dep.to_string_lossy().as_bytes());
	hasher.update(source.to_string_lossy().as_bytes());
	build_path.join("deps").join(format!("{}.ts", hex::encode(hasher.finalize())))
}

fn mtime(path: &Path) -> io::Result<SystemTime> {
	path.metadata()?.modified()
}

/// A source is outdated with respect to its scanned header dependencies
/// when any marker is missing or older than the header it stands for.
pub fn is_source_outdated(build_path: &Path, source: &Path, deps: &BTreeSet<PathBuf>) -> io::Result<bool> {
	for dep in deps {
		let marker = marker_path(build_path, source, dep);
		if !marker.exists() {
			log::debug!("outdated: {} (no marker for {})", source.display(), dep.display());
			return Ok(true);
		}
		if mtime(&marker)? < mtime(dep)? {
			log::debug!("outdated: {} (changed: {})", source.display(), dep.display());
			return Ok(true);
		}
	}
	Ok(false)
}

/// Refreshes every marker after a successful compile, so the dependency
/// reads as satisfied until the header's mtime moves past it again.
pub fn update_deps_timestamps(build_path: &Path, source: &Path, deps: &BTreeSet<PathBuf>) -> io::Result<()> {
	for dep in deps {
		let marker = marker_path(build_path, source, dep);
		if let Some(parent) = marker.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&marker, b"")?;
	}
	Ok(())
}
