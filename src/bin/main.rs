use std::{
	fs, //
	path::PathBuf,
	process::ExitCode,
	sync::Arc,
};

use clap::{Parser, Subcommand};

use ballista::{
	compile::Driver,
	error::Error,
	manifest,
	target::BuildContext,
	toolchain::{self, BuildType, Toolchain, ToolchainCache},
};

#[derive(Parser)]
#[command(name = "ballista", version, about = "An incremental build orchestrator for C and C++ projects")]
struct Args {
	/// Source directory containing ballista.toml
	#[arg(short = 'S', long = "source-dir", default_value = ".")]
	source_dir: PathBuf,

	/// Build directory (default: <source-dir>/build/<toolchain-id>-<build-type>)
	#[arg(short = 'B', long = "build-dir")]
	build_dir: Option<PathBuf>,

	/// Toolchain descriptor file, or the id of a previously used toolchain
	#[arg(short = 't', long, default_value = "toolchain.toml")]
	toolchain: String,

	/// Build type: Release, Debug, RelWithDebInfo or MinSizeRel
	#[arg(short = 'b', long = "build-type", default_value = "Release")]
	build_type: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Build one target (with its dependencies) or the whole project tree
	Build {
		target: Option<String>,
		/// Rebuild everything regardless of staleness
		#[arg(short, long)]
		force: bool,
		/// Limit on concurrent compiler processes
		#[arg(short, long)]
		jobs: Option<usize>,
	},
	/// Build an executable and run it
	Run {
		target: Option<String>,
		#[arg(trailing_var_arg = true)]
		args: Vec<String>,
	},
	/// Build everything and copy installable artifacts and headers
	Install { dest: PathBuf },
	/// Build and run test executables
	Test { target: Option<String> },
	/// Delete the build directory
	Clean,
}

fn load_toolchain(args: &Args) -> Result<Toolchain, Error> {
	let cache = ToolchainCache::new(args.source_dir.join("build").join("toolchains"));
	let path = args.source_dir.join(&args.toolchain);
	if path.exists() {
		let file = toolchain::read_toolchain_file(&path)?;
		cache.store(&file)?;
		Ok(Toolchain::from(file))
	} else {
		cache.get(&args.toolchain)
	}
}

async fn run(args: Args) -> Result<ExitCode, Error> {
	let mut toolchain = load_toolchain(&args)?;
	let build_type = BuildType::from_str(&args.build_type)?;
	toolchain.set_build_type(build_type);

	let build_dir = match &args.build_dir {
		Some(x) => x.clone(),
		None => args
			.source_dir
			.join("build")
			.join(format!("{}-{}", toolchain.id(), build_type)),
	};

	if let Command::Clean = args.command {
		if build_dir.exists() {
			log::info!("removing {}", build_dir.display());
			fs::remove_dir_all(&build_dir)?;
		}
		return Ok(ExitCode::SUCCESS);
	}

	let project = manifest::load_project(&args.source_dir, &build_dir)?;

	let (force, jobs) = match &args.command {
		Command::Build { force, jobs, .. } => (*force, *jobs),
		_ => (false, None),
	};
	let ctx = Arc::new(BuildContext {
		driver: Arc::new(Driver::new(Arc::new(toolchain), jobs)),
		force,
		pic: false,
	});

	match args.command {
		Command::Build { target, .. } => {
			project.build(ctx, target.as_deref()).await?;
		}
		Command::Run { target, args } => {
			let code = project.run(ctx, target.as_deref(), &args).await?;
			return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
		}
		Command::Install { dest } => {
			project.install(ctx, &dest).await?;
		}
		Command::Test { target } => {
			project.test(ctx, target.as_deref()).await?;
		}
		Command::Clean => unreachable!(),
	}
	Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
	env_logger::Builder::from_env(env_logger::Env::default().filter_or("BALLISTA_LOG", "info"))
		.format_timestamp(None)
		.init();

	let args = Args::parse();
	match run(args).await {
		Ok(code) => code,
		Err(e) => {
			eprintln!("Error: {}", e);
			ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
		}
	}
}
