use core::fmt;
use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The compiler family a toolchain belongs to. Flag conventions and
/// build-type flag tables key off this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
	Gcc,
	Clang,
	AppleClang,
	Msvc,
}

impl Family {
	pub fn as_str(&self) -> &'static str {
		match self {
			Family::Gcc => "gcc",
			Family::Clang => "clang",
			Family::AppleClang => "apple-clang",
			Family::Msvc => "msvc",
		}
	}

	pub fn is_clang(&self) -> bool {
		matches!(self, Family::Clang | Family::AppleClang)
	}

	pub fn is_msvc(&self) -> bool {
		matches!(self, Family::Msvc)
	}
}

impl fmt::Display for Family {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildType {
	Release,
	Debug,
	RelWithDebInfo,
	MinSizeRel,
}

impl BuildType {
	pub fn from_str(s: &str) -> Result<Self, Error> {
		match s {
			"Release" => Ok(BuildType::Release),
			"Debug" => Ok(BuildType::Debug),
			"RelWithDebInfo" => Ok(BuildType::RelWithDebInfo),
			"MinSizeRel" => Ok(BuildType::MinSizeRel),
			other => Err(Error::UnknownBuildType(other.to_owned())),
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			BuildType::Release => "Release",
			BuildType::Debug => "Debug",
			BuildType::RelWithDebInfo => "RelWithDebInfo",
			BuildType::MinSizeRel => "MinSizeRel",
		}
	}

	/// Compile flags appended exactly once when the build type is set.
	pub fn flags(&self, family: Family) -> &'static [&'static str] {
		if family.is_msvc() {
			match self {
				BuildType::Release => &["/O2", "/DNDEBUG"],
				BuildType::Debug => &["/Od", "/Zi"],
				BuildType::RelWithDebInfo => &["/O2", "/Zi", "/DNDEBUG"],
				BuildType::MinSizeRel => &["/O1", "/DNDEBUG"],
			}
		} else {
			match self {
				BuildType::Release => &["-O3", "-DNDEBUG"],
				BuildType::Debug => &["-g"],
				BuildType::RelWithDebInfo => &["-O2", "-g", "-DNDEBUG"],
				BuildType::MinSizeRel => &["-Os", "-DNDEBUG"],
			}
		}
	}
}

impl fmt::Display for BuildType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A toolchain's identity: `<name>-<major>-<arch>`, e.g. `gcc-11-x86_64`.
/// Used as the cache/lookup key and as part of the build directory name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolchainId {
	pub name: String,
	pub major: u32,
	pub arch: String,
}

impl ToolchainId {
	pub fn parse(id: &str) -> Result<Self, Error> {
		let mut parts = id.rsplitn(3, '-');
		let arch = parts.next();
		let major = parts.next();
		let name = parts.next();
		match (name, major, arch) {
			(Some(name), Some(major), Some(arch)) if !name.is_empty() && !arch.is_empty() => {
				let major = match major.parse::<u32>() {
					Ok(x) => x,
					Err(_) => return Err(Error::InvalidToolchainId(id.to_owned())),
				};
				Ok(ToolchainId {
					name: name.to_owned(),
					major,
					arch: arch.to_owned(),
				})
			}
			_ => Err(Error::InvalidToolchainId(id.to_owned())),
		}
	}
}

impl fmt::Display for ToolchainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}-{}-{}", self.name, self.major, self.arch)
	}
}

/// An immutable description of one compiler installation, produced by
/// external detection logic and consumed read-only by the compiler driver.
/// The only post-construction mutation is the one-shot build-type flag
/// accumulation.
#[derive(Debug)]
pub struct Toolchain {
	pub family: Family,
	pub version: String,
	pub arch: String,
	pub cc: PathBuf,
	pub cxx: PathBuf,
	pub ar: PathBuf,
	pub link: PathBuf,
	pub dbg: Option<PathBuf>,
	/// Compilation-cache wrapper (e.g. ccache). When present every compile
	/// command is prefixed with it.
	pub ccache: Option<PathBuf>,
	pub c_flags: Vec<String>,
	pub cxx_flags: Vec<String>,
	pub link_flags: Vec<String>,
	pub env: Vec<(String, String)>,
	build_type: Option<BuildType>,
}

impl Toolchain {
	pub fn major(&self) -> u32 {
		self.version
			.split('.')
			.next()
			.and_then(|x| x.parse().ok())
			.unwrap_or(0)
	}

	pub fn id(&self) -> ToolchainId {
		ToolchainId {
			name: self.family.as_str().to_owned(),
			major: self.major(),
			arch: self.arch.clone(),
		}
	}

	pub fn build_type(&self) -> Option<BuildType> {
		self.build_type
	}

	/// Appends the build-type flag table to the C and C++ flag lists.
	/// Setting the same build type again is a no-op; a different one is
	/// rejected so flags are never accumulated twice.
	pub fn set_build_type(&mut self, build_type: BuildType) {
		match self.build_type {
			Some(current) if current == build_type => {}
			Some(current) => {
				log::warn!("build type already set to {}, ignoring {}", current, build_type);
			}
			None => {
				for flag in build_type.flags(self.family) {
					self.c_flags.push((*flag).to_owned());
					self.cxx_flags.push((*flag).to_owned());
				}
				self.build_type = Some(build_type);
			}
		}
	}
}

/// On-disk descriptor shape. Detection logic (external to this crate)
/// writes these; `read_toolchain` consumes them.
#[derive(Debug, Deserialize, Serialize)]
pub struct ToolchainFile {
	pub family: Family,
	pub version: String,
	pub arch: String,
	pub cc: PathBuf,
	pub cxx: PathBuf,
	pub ar: PathBuf,
	pub link: PathBuf,
	pub dbg: Option<PathBuf>,
	pub ccache: Option<PathBuf>,
	pub c_flags: Option<Vec<String>>,
	pub cxx_flags: Option<Vec<String>>,
	pub link_flags: Option<Vec<String>>,
	pub env: Option<BTreeMap<String, String>>,
}

pub fn read_toolchain_file(toolchain_path: &Path) -> Result<ToolchainFile, Error> {
	let toolchain_toml = match fs::read_to_string(toolchain_path) {
		Ok(x) => x,
		Err(e) => {
			return Err(Error::ToolchainFile {
				path: toolchain_path.to_owned(),
				message: e.to_string(),
			})
		}
	};

	match toml::from_str::<ToolchainFile>(&toolchain_toml) {
		Ok(x) => Ok(x),
		Err(e) => Err(Error::ToolchainFile {
			path: toolchain_path.to_owned(),
			message: e.to_string(),
		}),
	}
}

pub fn read_toolchain(toolchain_path: &Path) -> Result<Toolchain, Error> {
	Ok(Toolchain::from(read_toolchain_file(toolchain_path)?))
}

impl From<ToolchainFile> for Toolchain {
	fn from(file: ToolchainFile) -> Self {
		let c_flags = file.c_flags.unwrap_or_default();
		let cxx_flags = file.cxx_flags.unwrap_or_default();
		let link_flags = file.link_flags.unwrap_or_default();
		// Environment overlay for spawned tools and `run` targets.
		let mut env = vec![
			("CC".to_owned(), file.cc.to_string_lossy().into_owned()),
			("CXX".to_owned(), file.cxx.to_string_lossy().into_owned()),
			("CFLAGS".to_owned(), c_flags.join(" ")),
			("CXXFLAGS".to_owned(), cxx_flags.join(" ")),
			("LDFLAGS".to_owned(), link_flags.join(" ")),
		];
		for (k, v) in file.env.unwrap_or_default() {
			env.push((k, v));
		}
		Toolchain {
			family: file.family,
			version: file.version,
			arch: file.arch,
			cc: file.cc,
			cxx: file.cxx,
			ar: file.ar,
			link: file.link,
			dbg: file.dbg,
			ccache: file.ccache,
			c_flags,
			cxx_flags,
			link_flags,
			env,
			build_type: None,
		}
	}
}

/// Toolchain descriptors cached on disk, one TOML file per toolchain id.
/// Looking up an id that was never cached fails loud rather than falling
/// back to detection (which is external to this crate).
pub struct ToolchainCache {
	dir: PathBuf,
}

impl ToolchainCache {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		ToolchainCache { dir: dir.into() }
	}

	fn path_for(&self, id: &ToolchainId) -> PathBuf {
		self.dir.join(format!("{}.toml", id))
	}

	pub fn store(&self, file: &ToolchainFile) -> Result<(), Error> {
		fs::create_dir_all(&self.dir)?;
		let id = ToolchainId {
			name: file.family.as_str().to_owned(),
			major: file.version.split('.').next().and_then(|x| x.parse().ok()).unwrap_or(0),
			arch: file.arch.clone(),
		};
		let path = self.path_for(&id);
		let text = match toml::to_string_pretty(file) {
			Ok(x) => x,
			Err(e) => {
				return Err(Error::ToolchainFile {
					path,
					message: e.to_string(),
				})
			}
		};
		fs::write(&path, text)?;
		Ok(())
	}

	pub fn get(&self, id: &str) -> Result<Toolchain, Error> {
		let id = ToolchainId::parse(id)?;
		let path = self.path_for(&id);
		if !path.exists() {
			return Err(Error::UnknownToolchain(id.to_string()));
		}
		read_toolchain(&path)
	}
}
