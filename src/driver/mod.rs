use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use crate::{
    codegen,
    errors::SlangError,
    interpreter::Vm,
    ir::Program,
    parser::parse_program,
    session::{OptLevel, Session},
};
use config::Config;
use linker::Toolchain;

pub mod config;
pub mod linker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CompilerArgs {
    /// Path to a `slang.toml` config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program with the interpreter.
    Interpret {
        /// The input file.
        input: PathBuf,
    },
    /// Compile a program into a native executable.
    Build(BuildArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// The input file.
    input: PathBuf,

    /// Where to write the executable. Defaults to the input file stem.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Build for release with all optimizations.
    #[arg(short, long, default_value_t = false)]
    release: bool,

    /// Also write the generated LLVM IR next to the executable.
    #[arg(long, default_value_t = false)]
    ll: bool,
}

pub fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = CompilerArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            let code = error
                .downcast_ref::<SlangError>()
                .map_or(1, SlangError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

pub fn run(args: CompilerArgs) -> anyhow::Result<()> {
    let start_time = Instant::now();

    let config = match &args.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            Config::from_toml(&source)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => Config::default(),
    };
    tracing::debug!("Using config: {:#?}", config);

    match args.command {
        Command::Interpret { input } => {
            let program = load(&input)?;
            let mut vm = Vm::new(config.limits);
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let result = vm.run(&program, &mut out);
            out.flush().ok();
            result?;
        }
        Command::Build(build) => {
            let program = load(&build.input)?;
            let output_file = match build.output {
                Some(output) => output,
                None => build
                    .input
                    .file_stem()
                    .map(PathBuf::from)
                    .with_context(|| format!("{} has no file name", build.input.display()))?,
            };
            tracing::debug!("Output file: {:?}", output_file);

            let session = Session {
                optlevel: if build.release {
                    OptLevel::Aggressive
                } else {
                    OptLevel::None
                },
                output_file,
                output_ll: build.ll,
                limits: config.limits,
            };
            tracing::debug!("Compiling with session: {:#?}", session);

            let module = codegen::compile(&session, &program)?;
            let toolchain = config.toolchain.toolchain();
            let executable = toolchain.build(&session, &module)?;
            println!("{}", executable.display());
        }
    }

    let elapsed = start_time.elapsed();
    tracing::debug!("Done in {:?}", elapsed);

    Ok(())
}

fn load(input: &Path) -> anyhow::Result<Program> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    tracing::debug!("source code:\n{}", source);
    let program =
        parse_program(&source).with_context(|| format!("failed to parse {}", input.display()))?;
    Ok(program)
}
