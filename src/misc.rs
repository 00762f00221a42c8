use std::path::Path;

pub(crate) fn is_c_source(filename: &str) -> bool {
	filename.ends_with(".c")
}

pub(crate) fn is_cpp_source(filename: &str) -> bool {
	filename.ends_with(".cpp") || filename.ends_with(".cc") || filename.ends_with(".cxx") || filename.ends_with(".C")
}

pub(crate) fn is_header(filename: &str) -> bool {
	filename.ends_with(".h")
		|| filename.ends_with(".hpp")
		|| filename.ends_with(".hxx")
		|| filename.ends_with(".hh")
		|| filename.ends_with(".inl")
}

/// A translation unit is anything the compiler is fed directly; headers are
/// carried in `sources` for install purposes but never compiled.
pub(crate) fn is_translation_unit(path: &Path) -> bool {
	let name = path.to_string_lossy();
	is_c_source(&name) || is_cpp_source(&name)
}
