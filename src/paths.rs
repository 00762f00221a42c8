use std::{
	path::{Component, Path, PathBuf},
	sync::Arc,
};

use crate::{error::Error, events::Generator};

/// Lexical normalization: resolves `.` and `..` segments without touching
/// the filesystem, so entries may name files that do not exist yet.
pub(crate) fn normalize(path: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				if !out.pop() {
					out.push(Component::ParentDir);
				}
			}
			other => out.push(other),
		}
	}
	out
}

/// An ordered, deduplicated collection of paths anchored to a root
/// directory. Entries may be given relative to the root or absolute;
/// duplicates (by normalized absolute form) are silently dropped.
///
/// Generator hooks appended to a set are routed to a separate `events`
/// list; they never appear in `absolute()`.
#[derive(Clone, Debug)]
pub struct PathSet {
	root: PathBuf,
	entries: Vec<PathBuf>,
	events: Vec<Arc<Generator>>,
}

impl PathSet {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		PathSet {
			root: normalize(&root.into()),
			entries: Vec::new(),
			events: Vec::new(),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn append(&mut self, path: impl Into<PathBuf>) {
		let path = path.into();
		let resolved = normalize(&self.root.join(&path));
		if self.entries.iter().any(|e| normalize(&self.root.join(e)) == resolved) {
			return;
		}
		self.entries.push(path);
	}

	pub fn extend<I>(&mut self, paths: I)
	where
		I: IntoIterator,
		I::Item: Into<PathBuf>,
	{
		for path in paths {
			self.append(path);
		}
	}

	/// Appends every entry of `other`, re-rooted under `other`'s own root,
	/// so moving a path list between targets preserves its original anchor.
	pub fn extend_set(&mut self, other: &PathSet) {
		for entry in &other.entries {
			self.append(other.root.join(entry));
		}
		for event in &other.events {
			self.push_event(Arc::clone(event));
		}
	}

	/// Root-joined, normalized paths in insertion order. This is the view
	/// used everywhere a real filesystem path is required.
	pub fn absolute(&self) -> Vec<PathBuf> {
		self.entries.iter().map(|e| normalize(&self.root.join(e))).collect()
	}

	pub fn glob(&mut self, pattern: &str) -> Result<(), Error> {
		let full = self.root.join(pattern);
		for entry in glob::glob(&full.to_string_lossy())? {
			match entry {
				Ok(path) => self.append(path),
				Err(e) => log::warn!("skipping unreadable glob match: {}", e),
			}
		}
		Ok(())
	}

	pub fn rglob(&mut self, pattern: &str) -> Result<(), Error> {
		let recursive = Path::new("**").join(pattern);
		self.glob(&recursive.to_string_lossy())
	}

	/// Removes entries whose string form matches a shell-glob pattern.
	pub fn rfilter(&mut self, pattern: &str) -> Result<(), Error> {
		let pattern = glob::Pattern::new(pattern)?;
		self.entries.retain(|e| !pattern.matches(&e.to_string_lossy()));
		Ok(())
	}

	pub fn push_event(&mut self, event: Arc<Generator>) {
		if self.events.iter().any(|e| Arc::ptr_eq(e, &event)) {
			return;
		}
		self.events.push(event);
	}

	pub fn events(&self) -> &[Arc<Generator>] {
		&self.events
	}

	pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
