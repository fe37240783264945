use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod compiler;
mod config;
mod package;
mod vm;

use config::RuntimeConfig;

#[derive(Parser)]
#[command(name = "lumo")]
#[command(about = "A small scripting language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new lumo project
    Init {
        /// Project name (defaults to directory name)
        name: Option<String>,
    },
    /// Compile and run a lumo source file
    Run {
        /// The source file to run (defaults to pkg.toml entry if in a project)
        file: Option<PathBuf>,

        /// Execute code directly from command line
        #[arg(short = 'c', long)]
        code: Option<String>,

        /// Trace each instruction while running
        #[arg(long)]
        trace: bool,

        /// Dump compiled bytecode to stderr before running
        #[arg(long)]
        dump_bytecode: bool,
    },
    /// Compile a lumo source file without running it
    Check {
        /// The source file to check (defaults to pkg.toml entry if in a project)
        file: Option<PathBuf>,
    },
    /// Print the compiled bytecode of a lumo source file
    Dis {
        /// The source file to disassemble
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { name } => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if let Err(e) = package::init_project(&cwd, name.as_deref()) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Run {
            file,
            code,
            trace,
            dump_bytecode,
        } => {
            let config = RuntimeConfig {
                trace_execution: trace,
                dump_bytecode,
            };

            let run_result = if let Some(source) = code {
                compiler::run_source("<code>", &source, &config)
            } else {
                let path = match resolve_entry(file, "run") {
                    Some(p) => p,
                    None => return ExitCode::FAILURE,
                };
                compiler::run_file(&path, &config)
            };

            if let Err(e) = run_result {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Check { file } => {
            let path = match resolve_entry(file, "check") {
                Some(p) => p,
                None => return ExitCode::FAILURE,
            };

            if let Err(e) = compiler::check_file(&path) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
            println!("Check passed.");
        }
        Commands::Dis { file } => match compiler::disassemble_file(&file) {
            Ok(listing) => print!("{}", listing),
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
    }

    ExitCode::SUCCESS
}

/// Use the given file, or fall back to the pkg.toml entry point.
fn resolve_entry(file: Option<PathBuf>, verb: &str) -> Option<PathBuf> {
    match file {
        Some(p) => Some(p),
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            match package::PackageManifest::load(&cwd) {
                Ok(manifest) => Some(cwd.join(&manifest.package.entry)),
                Err(_) => {
                    eprintln!("error: no file specified and no pkg.toml found");
                    eprintln!(
                        "usage: lumo {} <file> or run from a lumo project directory",
                        verb
                    );
                    None
                }
            }
        }
    }
}
