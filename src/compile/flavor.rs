use std::path::{Path, PathBuf};

use crate::toolchain::Family;

fn path_str(path: &Path) -> String {
	path.to_string_lossy().into_owned()
}

/// Platform flag/extension conventions. The driver assembles every tool
/// invocation through one of these, so Unix and MSVC toolchains differ
/// only in the argument vectors they produce.
pub trait Flavor: Send + Sync {
	fn object_extension(&self) -> &'static str;
	fn include_path_flag(&self) -> &'static str;
	fn lib_path_flag(&self) -> &'static str;
	fn define_flag(&self) -> &'static str;
	fn pic_flag(&self) -> Option<&'static str>;

	fn lib_flag(&self, name: &str) -> String;
	fn static_lib_name(&self, name: &str) -> String;
	fn shared_lib_name(&self, name: &str) -> String;
	fn executable_name(&self, name: &str) -> String;

	/// Name of the environment variable the dynamic loader consults, for
	/// injecting the artifact lib dir when running built executables.
	fn loader_path_var(&self) -> &'static str;

	/// Secondary artifact emitted next to a shared library, if the platform
	/// has one: the import library dependents actually link against.
	fn import_lib(&self, shared_lib: &Path) -> Option<PathBuf>;

	fn compile_args(&self, source: &Path, out: &Path, flags: &[String], pic: bool) -> Vec<String>;
	fn static_lib_args(&self, output: &Path, objects: &[String]) -> Vec<String>;
	fn shared_lib_args(&self, output: &Path, objects: &[String], flags: &[String], pic: bool) -> Vec<String>;
	fn link_args(&self, output: &Path, objects: &[String], flags: &[String], pic: bool) -> Vec<String>;
}

pub fn for_family(family: Family) -> Box<dyn Flavor> {
	if family.is_msvc() {
		Box::new(MsvcFlavor {})
	} else {
		Box::new(UnixFlavor {
			darwin: family == Family::AppleClang,
		})
	}
}

pub struct UnixFlavor {
	/// Apple toolchains share the Unix flag conventions but differ in the
	/// shared-library suffix and the loader search variable.
	pub darwin: bool,
}

impl Flavor for UnixFlavor {
	fn object_extension(&self) -> &'static str {
		".o"
	}
	fn include_path_flag(&self) -> &'static str {
		"-I"
	}
	fn lib_path_flag(&self) -> &'static str {
		"-L"
	}
	fn define_flag(&self) -> &'static str {
		"-D"
	}
	fn pic_flag(&self) -> Option<&'static str> {
		Some("-fPIC")
	}

	fn lib_flag(&self, name: &str) -> String {
		format!("-l{}", name)
	}
	fn static_lib_name(&self, name: &str) -> String {
		format!("lib{}.a", name)
	}
	fn shared_lib_name(&self, name: &str) -> String {
		if self.darwin {
			format!("lib{}.dylib", name)
		} else {
			format!("lib{}.so", name)
		}
	}
	fn executable_name(&self, name: &str) -> String {
		name.to_owned()
	}
	fn loader_path_var(&self) -> &'static str {
		if self.darwin {
			"DYLD_LIBRARY_PATH"
		} else {
			"LD_LIBRARY_PATH"
		}
	}
	fn import_lib(&self, _shared_lib: &Path) -> Option<PathBuf> {
		None
	}

	fn compile_args(&self, source: &Path, out: &Path, flags: &[String], pic: bool) -> Vec<String> {
		let mut args = Vec::with_capacity(flags.len() + 5);
		if pic {
			args.push("-fPIC".to_owned());
		}
		args.extend(flags.iter().cloned());
		args.push("-c".to_owned());
		args.push(path_str(source));
		args.push("-o".to_owned());
		args.push(path_str(out));
		args
	}

	fn static_lib_args(&self, output: &Path, objects: &[String]) -> Vec<String> {
		let mut args = vec!["rcs".to_owned(), path_str(output)];
		args.extend(objects.iter().cloned());
		args
	}

	fn shared_lib_args(&self, output: &Path, objects: &[String], flags: &[String], pic: bool) -> Vec<String> {
		let mut args = vec!["-shared".to_owned()];
		if pic {
			args.push("-fPIC".to_owned());
		}
		args.extend(flags.iter().cloned());
		args.extend(objects.iter().cloned());
		args.push("-o".to_owned());
		args.push(path_str(output));
		args
	}

	fn link_args(&self, output: &Path, objects: &[String], flags: &[String], pic: bool) -> Vec<String> {
		let mut args = Vec::new();
		if pic {
			args.push("-fPIC".to_owned());
		}
		args.extend(objects.iter().cloned());
		args.extend(flags.iter().cloned());
		args.push("-o".to_owned());
		args.push(path_str(output));
		args
	}
}

pub struct MsvcFlavor {}

impl Flavor for MsvcFlavor {
	fn object_extension(&self) -> &'static str {
		".obj"
	}
	fn include_path_flag(&self) -> &'static str {
		"/I"
	}
	fn lib_path_flag(&self) -> &'static str {
		"/LIBPATH:"
	}
	fn define_flag(&self) -> &'static str {
		"/D"
	}
	// PIC is not a concept on MSVC; requesting it is a no-op.
	fn pic_flag(&self) -> Option<&'static str> {
		None
	}

	fn lib_flag(&self, name: &str) -> String {
		format!("{}.lib", name)
	}
	fn static_lib_name(&self, name: &str) -> String {
		format!("{}.lib", name)
	}
	fn shared_lib_name(&self, name: &str) -> String {
		format!("{}.dll", name)
	}
	fn executable_name(&self, name: &str) -> String {
		format!("{}.exe", name)
	}
	fn loader_path_var(&self) -> &'static str {
		"PATH"
	}
	fn import_lib(&self, shared_lib: &Path) -> Option<PathBuf> {
		Some(shared_lib.with_extension("lib"))
	}

	fn compile_args(&self, source: &Path, out: &Path, flags: &[String], _pic: bool) -> Vec<String> {
		let mut args = Vec::with_capacity(flags.len() + 3);
		args.extend(flags.iter().cloned());
		args.push("/c".to_owned());
		args.push(path_str(source));
		args.push(format!("/Fo{}", path_str(out)));
		args
	}

	fn static_lib_args(&self, output: &Path, objects: &[String]) -> Vec<String> {
		let mut args: Vec<String> = objects.to_vec();
		args.push(format!("/OUT:{}", path_str(output)));
		args
	}

	fn shared_lib_args(&self, output: &Path, objects: &[String], flags: &[String], _pic: bool) -> Vec<String> {
		let mut args = vec!["/DLL".to_owned()];
		args.extend(flags.iter().cloned());
		args.extend(objects.iter().cloned());
		args.push(format!("/OUT:{}", path_str(output)));
		// The import library dependents link against.
		args.push(format!("/IMPLIB:{}", path_str(&output.with_extension("lib"))));
		args
	}

	fn link_args(&self, output: &Path, objects: &[String], flags: &[String], _pic: bool) -> Vec<String> {
		let mut args: Vec<String> = flags.to_vec();
		args.extend(objects.iter().cloned());
		args.push(format!("/OUT:{}", path_str(output)));
		args
	}
}
