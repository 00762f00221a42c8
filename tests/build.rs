#![cfg(unix)]

use std::{
	collections::BTreeMap,
	fs,
	os::unix::fs::PermissionsExt,
	path::{Path, PathBuf},
	sync::Arc,
};

use filetime::FileTime;

use ballista::{
	compile::Driver,
	error::Error,
	manifest,
	project::Project,
	target::BuildContext,
	toolchain::{Family, Toolchain, ToolchainFile},
};

/// A scratch project driven by a fake compiler: a shell script that logs
/// every invocation and touches the requested output file, so staleness
/// and command assembly are exercised without any real toolchain.
struct Scratch {
	dir: tempfile::TempDir,
}

impl Scratch {
	fn new() -> Scratch {
		let dir = tempfile::tempdir().unwrap();
		let tool = dir.path().join("fakecc");
		fs::write(
			&tool,
			concat!(
				"#!/bin/sh\n",
				"echo \"$@\" >> \"$FAKE_LOG\"\n",
				"out=\"\"\n",
				"prev=\"\"\n",
				"for a in \"$@\"; do\n",
				"  if [ \"$prev\" = \"-o\" ]; then out=\"$a\"; fi\n",
				"  prev=\"$a\"\n",
				"done\n",
				"if [ -z \"$out\" ] && [ \"$1\" = \"rcs\" ]; then out=\"$2\"; fi\n",
				"[ -n \"$out\" ] && : > \"$out\"\n",
				"exit 0\n",
			),
		)
		.unwrap();
		fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
		Scratch { dir }
	}

	fn root(&self) -> &Path {
		self.dir.path()
	}

	fn build_dir(&self) -> PathBuf {
		self.root().join("build")
	}

	fn log_path(&self) -> PathBuf {
		self.root().join("commands.log")
	}

	fn write(&self, rel: &str, content: &str) {
		let path = self.root().join(rel);
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(path, content).unwrap();
	}

	fn toolchain(&self) -> Toolchain {
		let tool = self.root().join("fakecc");
		Toolchain::from(ToolchainFile {
			family: Family::Gcc,
			version: "11.0.0".to_owned(),
			arch: "x86_64".to_owned(),
			cc: tool.clone(),
			cxx: tool.clone(),
			ar: tool.clone(),
			link: tool,
			dbg: None,
			ccache: None,
			c_flags: None,
			cxx_flags: None,
			link_flags: None,
			env: Some(BTreeMap::from([(
				"FAKE_LOG".to_owned(),
				self.log_path().to_string_lossy().into_owned(),
			)])),
		})
	}

	/// A fake MSVC-convention tool: creates whatever `/Fo`, `/OUT:` and
	/// `/IMPLIB:` name, so DLL builds produce both artifacts.
	fn msvc_toolchain(&self) -> Toolchain {
		let tool = self.root().join("fakecl");
		fs::write(
			&tool,
			concat!(
				"#!/bin/sh\n",
				"echo \"$@\" >> \"$FAKE_LOG\"\n",
				"for a in \"$@\"; do\n",
				"  case \"$a\" in\n",
				"    /Fo*) : > \"${a#/Fo}\" ;;\n",
				"    /OUT:*) : > \"${a#/OUT:}\" ;;\n",
				"    /IMPLIB:*) : > \"${a#/IMPLIB:}\" ;;\n",
				"  esac\n",
				"done\n",
				"exit 0\n",
			),
		)
		.unwrap();
		fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
		Toolchain::from(ToolchainFile {
			family: Family::Msvc,
			version: "19.30.0".to_owned(),
			arch: "x86_64".to_owned(),
			cc: tool.clone(),
			cxx: tool.clone(),
			ar: tool.clone(),
			link: tool,
			dbg: None,
			ccache: None,
			c_flags: None,
			cxx_flags: None,
			link_flags: None,
			env: Some(BTreeMap::from([(
				"FAKE_LOG".to_owned(),
				self.log_path().to_string_lossy().into_owned(),
			)])),
		})
	}

	/// A freshly loaded project and context, as a new process would see it.
	/// Build-state memoization never carries over between calls.
	fn load(&self) -> (Arc<Project>, Arc<BuildContext>) {
		let project = manifest::load_project(self.root(), &self.build_dir()).unwrap();
		let ctx = Arc::new(BuildContext {
			driver: Arc::new(Driver::new(Arc::new(self.toolchain()), None)),
			force: false,
			pic: false,
		});
		(project, ctx)
	}

	fn clear_log(&self) {
		fs::write(self.log_path(), "").unwrap();
	}

	fn log_lines(&self) -> Vec<String> {
		match fs::read_to_string(self.log_path()) {
			Ok(x) => x.lines().map(str::to_owned).collect(),
			Err(_) => Vec::new(),
		}
	}

	fn touch_future(&self, rel: &str) {
		let future = FileTime::from_unix_time(FileTime::now().unix_seconds() + 120, 0);
		filetime::set_file_mtime(self.root().join(rel), future).unwrap();
	}
}

fn basic_hello(scratch: &Scratch) {
	scratch.write(
		"ballista.toml",
		r#"
			name = "hello-world"
			version = "0.1.0"
			subprojects = ["libs/basic"]
			main-executable = "hello"

			[[executable]]
			name = "hello"
			sources = ["src/hello.cpp"]
			links = ["basic"]
			install = true
		"#,
	);
	scratch.write(
		"libs/basic/ballista.toml",
		r#"
			name = "basic"
			version = "0.1.0"

			[[library]]
			name = "basic"
			sources = ["src/basic.cpp", "include/basic.hpp"]
			include-dirs = ["include"]
			install = true
		"#,
	);
	scratch.write("libs/basic/include/basic.hpp", "#pragma once\nint basic();\n");
	scratch.write("libs/basic/src/basic.cpp", "#include \"basic.hpp\"\nint basic() { return 4; }\n");
	// Deliberately does not include basic.hpp: a header touch must not
	// recompile this file, only relink the executable.
	scratch.write("src/hello.cpp", "int basic();\nint main() { return basic(); }\n");
}

#[tokio::test]
async fn full_build_noop_rebuild_and_header_touch() {
	let scratch = Scratch::new();
	basic_hello(&scratch);

	// Cold build: compile basic.cpp, archive, compile hello.cpp, link.
	let (project, ctx) = scratch.load();
	let rebuilt = project.build(ctx.clone(), None).await.unwrap();
	assert!(rebuilt);
	let lines = scratch.log_lines();
	assert_eq!(lines.len(), 4, "unexpected commands: {:?}", lines);
	assert!(scratch.build_dir().join("lib/libbasic.a").exists());
	assert!(scratch.build_dir().join("bin/hello").exists());
	let compile_line = lines.iter().find(|l| l.contains("basic.cpp")).unwrap();
	assert!(compile_line.contains("-I"), "missing include flag: {}", compile_line);

	// Everything up to date: not a single tool launch.
	scratch.clear_log();
	let (project, ctx) = scratch.load();
	let rebuilt = project.build(ctx, None).await.unwrap();
	assert!(!rebuilt);
	assert_eq!(scratch.log_lines().len(), 0);

	// A public header changes: its including source recompiles, the
	// archive is rebuilt and the executable relinks, but hello.cpp
	// (which does not include the header) is left alone.
	scratch.clear_log();
	scratch.touch_future("libs/basic/include/basic.hpp");
	let (project, ctx) = scratch.load();
	let rebuilt = project.build(ctx, None).await.unwrap();
	assert!(rebuilt);
	let lines = scratch.log_lines();
	assert_eq!(lines.len(), 3, "unexpected commands: {:?}", lines);
	assert_eq!(lines.iter().filter(|l| l.contains("basic.cpp")).count(), 1);
	assert_eq!(lines.iter().filter(|l| l.contains("hello.cpp")).count(), 0);
	assert_eq!(lines.iter().filter(|l| l.starts_with("rcs ")).count(), 1);
	assert_eq!(lines.iter().filter(|l| l.ends_with("bin/hello")).count(), 1);
}

#[tokio::test]
async fn shared_dependency_builds_at_most_once() {
	let scratch = Scratch::new();
	scratch.write(
		"ballista.toml",
		r#"
			name = "two-apps"
			version = "0.1.0"
			subprojects = ["libs/basic"]

			[[executable]]
			name = "alpha"
			sources = ["src/alpha.cpp"]
			links = ["basic"]

			[[executable]]
			name = "beta"
			sources = ["src/beta.cpp"]
			links = ["basic"]
		"#,
	);
	scratch.write(
		"libs/basic/ballista.toml",
		r#"
			name = "basic"
			version = "0.1.0"

			[[library]]
			name = "basic"
			sources = ["src/basic.cpp"]
			include-dirs = ["include"]
		"#,
	);
	scratch.write("libs/basic/include/basic.hpp", "#pragma once\n");
	scratch.write("libs/basic/src/basic.cpp", "#include \"basic.hpp\"\n");
	scratch.write("src/alpha.cpp", "int main() { return 0; }\n");
	scratch.write("src/beta.cpp", "int main() { return 1; }\n");

	// Both executables race to build the library; it compiles and
	// archives exactly once.
	let (project, ctx) = scratch.load();
	project.build(ctx, None).await.unwrap();
	let lines = scratch.log_lines();
	assert_eq!(lines.iter().filter(|l| l.contains("basic.cpp")).count(), 1);
	assert_eq!(lines.iter().filter(|l| l.starts_with("rcs ")).count(), 1);
	assert_eq!(lines.iter().filter(|l| l.contains("alpha.cpp")).count(), 1);
	assert_eq!(lines.iter().filter(|l| l.contains("beta.cpp")).count(), 1);
}

#[tokio::test]
async fn header_only_library_is_never_compiled_or_archived() {
	let scratch = Scratch::new();
	scratch.write(
		"ballista.toml",
		r#"
			name = "hdr-app"
			version = "0.1.0"

			[[library]]
			name = "hdrs"
			sources = ["include/hdrs.hpp"]
			include-dirs = ["include"]

			[[executable]]
			name = "app"
			sources = ["src/app.cpp"]
			links = ["hdrs"]
		"#,
	);
	scratch.write("include/hdrs.hpp", "#pragma once\n#define GREETING 1\n");
	scratch.write("src/app.cpp", "#include \"hdrs.hpp\"\nint main() { return GREETING; }\n");

	let (project, ctx) = scratch.load();
	project.build(ctx, None).await.unwrap();
	let lines = scratch.log_lines();
	// One compile, one link, no archive step for the header-only library.
	assert_eq!(lines.len(), 2, "unexpected commands: {:?}", lines);
	assert!(lines.iter().all(|l| !l.starts_with("rcs ")));
	let compile_line = lines.iter().find(|l| l.contains("app.cpp")).unwrap();
	assert!(compile_line.contains("include"), "missing include dir: {}", compile_line);

	// Touching the header makes the including source stale again.
	scratch.clear_log();
	scratch.touch_future("include/hdrs.hpp");
	let (project, ctx) = scratch.load();
	let rebuilt = project.build(ctx, None).await.unwrap();
	assert!(rebuilt);
	assert_eq!(scratch.log_lines().iter().filter(|l| l.contains("app.cpp")).count(), 1);
}

#[tokio::test]
async fn deps_scan_is_one_level_only() {
	let scratch = Scratch::new();
	scratch.write(
		"ballista.toml",
		r#"
			name = "nested"
			version = "0.1.0"

			[[executable]]
			name = "app"
			sources = ["src/app.cpp"]
			include-dirs = ["include"]
		"#,
	);
	scratch.write("include/outer.hpp", "#pragma once\n#include \"inner.hpp\"\n");
	scratch.write("include/inner.hpp", "#pragma once\n");
	scratch.write("src/app.cpp", "#include \"outer.hpp\"\nint main() { return 0; }\n");

	let (project, ctx) = scratch.load();
	project.build(ctx, None).await.unwrap();
	assert_eq!(scratch.log_lines().len(), 2);

	// The indirectly included header is invisible to the scanner; only a
	// change to the directly included one triggers a recompile.
	scratch.clear_log();
	scratch.touch_future("include/inner.hpp");
	let (project, ctx) = scratch.load();
	assert!(!project.build(ctx, None).await.unwrap());
	assert_eq!(scratch.log_lines().len(), 0);

	scratch.clear_log();
	scratch.touch_future("include/outer.hpp");
	let (project, ctx) = scratch.load();
	assert!(project.build(ctx, None).await.unwrap());
	assert_eq!(scratch.log_lines().iter().filter(|l| l.contains("app.cpp")).count(), 1);
}

#[tokio::test]
async fn force_rebuilds_everything() {
	let scratch = Scratch::new();
	basic_hello(&scratch);
	let (project, ctx) = scratch.load();
	project.build(ctx, None).await.unwrap();

	scratch.clear_log();
	let project = manifest::load_project(scratch.root(), &scratch.build_dir()).unwrap();
	let ctx = Arc::new(BuildContext {
		driver: Arc::new(Driver::new(Arc::new(scratch.toolchain()), Some(2))),
		force: true,
		pic: false,
	});
	assert!(project.build(ctx, None).await.unwrap());
	assert_eq!(scratch.log_lines().len(), 4);
}

#[tokio::test]
async fn compile_failure_carries_the_tool_exit_code() {
	let scratch = Scratch::new();
	basic_hello(&scratch);
	let failing = scratch.root().join("failcc");
	fs::write(&failing, "#!/bin/sh\necho \"boom\" >&2\nexit 7\n").unwrap();
	fs::set_permissions(&failing, fs::Permissions::from_mode(0o755)).unwrap();

	let mut toolchain = scratch.toolchain();
	toolchain.cc = failing.clone();
	toolchain.cxx = failing;
	let project = manifest::load_project(scratch.root(), &scratch.build_dir()).unwrap();
	let ctx = Arc::new(BuildContext {
		driver: Arc::new(Driver::new(Arc::new(toolchain), None)),
		force: false,
		pic: false,
	});
	let err = project.build(ctx, Some("hello")).await.unwrap_err();
	match &err {
		Error::Compile { source, .. } => {
			assert_eq!(source.status, Some(7));
			assert!(source.stderr.contains("boom"));
		}
		other => panic!("unexpected error: {:?}", other),
	}
	assert_eq!(err.exit_code(), 7);
}

#[tokio::test]
async fn transitive_usage_requirements_reach_the_final_compile() {
	use ballista::{compile::CommandLog, link_type::LinkPtr};
	use std::sync::Mutex;

	let scratch = Scratch::new();
	scratch.write("src/a.cpp", "int main() { return 0; }\n");
	scratch.write("src/b.cpp", "\n");
	scratch.write("src/c.cpp", "\n");

	let project = Project::new("chain", "0.1.0", scratch.root(), &scratch.build_dir(), Vec::new());
	let c = project.add_library("c", false).unwrap();
	{
		let mut attrs = c.core().attrs_mut();
		attrs.sources.append("src/c.cpp");
		attrs.include_dirs.append("inc_c");
		attrs.compile_definitions.push(("C_API".to_owned(), None));
	}
	let b = project.add_library("b", false).unwrap();
	{
		let mut attrs = b.core().attrs_mut();
		attrs.sources.append("src/b.cpp");
		attrs.link_libraries.push(LinkPtr::Library(Arc::clone(&c)));
	}
	let a = project.add_executable("a", false).unwrap();
	{
		let mut attrs = a.core().attrs_mut();
		attrs.sources.append("src/a.cpp");
		attrs.link_libraries.push(LinkPtr::Library(Arc::clone(&b)));
	}
	// Attributes may keep changing until the first build reads them.
	c.core()
		.attrs_mut()
		.compile_definitions
		.push(("LATE".to_owned(), Some("1".to_owned())));

	let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
	let ctx = Arc::new(BuildContext {
		driver: Arc::new(Driver::recording(Arc::new(scratch.toolchain()), None, Arc::clone(&log), true)),
		force: false,
		pic: false,
	});
	project.build(ctx, Some("a")).await.unwrap();

	let recorded = log.lock().unwrap();
	let compile_a = recorded.iter().find(|l| l.contains("a.cpp")).unwrap();
	let inc_c = format!("-I{}", scratch.root().join("inc_c").display());
	assert!(compile_a.contains(&inc_c), "missing include dir: {}", compile_a);
	assert!(compile_a.contains("-DC_API"), "missing define: {}", compile_a);
	assert!(compile_a.contains("-DLATE=1"), "missing late define: {}", compile_a);
	// Link order: dependents before dependencies.
	let link_a = recorded.iter().find(|l| l.contains("-lb")).unwrap();
	let (pos_b, pos_c) = (link_a.find("-lb").unwrap(), link_a.find("-lc").unwrap());
	assert!(pos_b < pos_c, "wrong link order: {}", link_a);
}

#[tokio::test]
async fn generators_run_before_sources_are_compiled() {
	use ballista::events::{Generator, GeneratorFuture};

	let scratch = Scratch::new();
	fs::create_dir_all(scratch.root().join("src")).unwrap();
	let generated = scratch.root().join("src/app.cpp");

	let project = Project::new("gen", "0.1.0", scratch.root(), &scratch.build_dir(), Vec::new());
	let exe = project.add_executable("app", false).unwrap();
	{
		let output = generated.clone();
		let hook = Generator::new("write-app", vec![generated.clone()], move || {
			let output = output.clone();
			Box::pin(async move {
				tokio::fs::write(&output, "int main() { return 0; }\n").await?;
				Ok(())
			}) as GeneratorFuture
		});
		let mut attrs = exe.core().attrs_mut();
		attrs.sources.append(&generated);
		attrs.dependencies.push_event(hook);
	}

	let ctx = Arc::new(BuildContext {
		driver: Arc::new(Driver::new(Arc::new(scratch.toolchain()), None)),
		force: false,
		pic: false,
	});
	assert!(project.build(ctx, None).await.unwrap());
	assert!(generated.exists());
	assert_eq!(scratch.log_lines().iter().filter(|l| l.contains("app.cpp")).count(), 1);
}

#[tokio::test]
async fn bare_build_leaves_unlinked_subproject_targets_alone() {
	let scratch = Scratch::new();
	scratch.write(
		"ballista.toml",
		r#"
			name = "hello-world"
			version = "0.1.0"
			subprojects = ["libs/basic"]

			[[executable]]
			name = "hello"
			sources = ["src/hello.cpp"]
			links = ["basic"]
		"#,
	);
	scratch.write(
		"libs/basic/ballista.toml",
		r#"
			name = "basic"
			version = "0.1.0"

			[[library]]
			name = "basic"
			sources = ["src/basic.cpp"]

			[[library]]
			name = "extra"
			sources = ["src/extra.cpp"]

			[[executable]]
			name = "extra-check"
			sources = ["src/check.cpp"]
			test = true
		"#,
	);
	scratch.write("libs/basic/src/basic.cpp", "int basic() { return 4; }\n");
	scratch.write("libs/basic/src/extra.cpp", "int extra() { return 5; }\n");
	scratch.write("libs/basic/src/check.cpp", "int main() { return 0; }\n");
	scratch.write("src/hello.cpp", "int basic();\nint main() { return basic(); }\n");

	// A bare build covers the root's own targets: the link dependency
	// pulls in "basic", but nothing reaches the other subproject targets.
	let (project, ctx) = scratch.load();
	project.build(ctx, None).await.unwrap();
	let lines = scratch.log_lines();
	assert_eq!(lines.iter().filter(|l| l.contains("basic.cpp")).count(), 1);
	assert_eq!(lines.iter().filter(|l| l.contains("extra.cpp")).count(), 0);
	assert_eq!(lines.iter().filter(|l| l.contains("check.cpp")).count(), 0);

	// The root's test run covers only its own test executables too; with
	// none declared it builds and runs nothing.
	scratch.clear_log();
	let (project, ctx) = scratch.load();
	project.test(ctx, None).await.unwrap();
	assert_eq!(scratch.log_lines().len(), 0);

	// Naming a subproject target still builds it.
	let (project, ctx) = scratch.load();
	project.build(ctx, Some("extra")).await.unwrap();
	assert_eq!(scratch.log_lines().iter().filter(|l| l.contains("extra.cpp")).count(), 1);
}

#[tokio::test]
async fn install_places_the_import_library_with_the_static_libs() {
	let scratch = Scratch::new();
	scratch.write(
		"ballista.toml",
		r#"
			name = "dll-proj"
			version = "0.1.0"

			[[library]]
			name = "basic"
			sources = ["src/basic.cpp"]
			shared = true
			install = true
		"#,
	);
	scratch.write("src/basic.cpp", "int basic() { return 4; }\n");

	let project = manifest::load_project(scratch.root(), &scratch.build_dir()).unwrap();
	let ctx = Arc::new(BuildContext {
		driver: Arc::new(Driver::new(Arc::new(scratch.msvc_toolchain()), None)),
		force: false,
		pic: false,
	});
	let dest = scratch.root().join("dist");
	project.install(ctx, &dest).await.unwrap();
	// The DLL is a runtime artifact; the import library is what
	// dependents link against.
	assert!(dest.join("bin/basic.dll").exists());
	assert!(dest.join("lib/basic.lib").exists());
}

#[tokio::test]
async fn install_copies_artifacts_and_public_headers() {
	let scratch = Scratch::new();
	basic_hello(&scratch);
	let (project, ctx) = scratch.load();
	let dest = scratch.root().join("dist");
	project.install(ctx, &dest).await.unwrap();
	assert!(dest.join("bin/hello").exists());
	assert!(dest.join("lib/libbasic.a").exists());
	assert!(dest.join("include/basic.hpp").exists());
}
