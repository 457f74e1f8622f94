use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tern_bytecode::dump::disassemble;
use tern_compiler::{Compiler, GeneratorConfig};
use tern_vm::{VmError, VmOptions, VmRuntime};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(name = "tern", version, about = "tern JavaScript engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script
    Run {
        entry: PathBuf,
        /// Send every call down the generic path
        #[arg(long)]
        no_call_linking: bool,
        /// Frames allowed before RangeError
        #[arg(long)]
        max_call_depth: Option<u32>,
        /// Relinks per call site before it goes permanently generic
        #[arg(long)]
        thrash_limit: Option<u32>,
    },
    /// Print the bytecode of a script
    Dump {
        entry: PathBuf,
        /// Leave out debugger hooks
        #[arg(long)]
        no_debug_hooks: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            entry,
            no_call_linking,
            max_call_depth,
            thrash_limit,
        } => {
            let mut options = VmOptions::default();
            if no_call_linking {
                options = options.with_call_linking(false);
            }
            if let Some(depth) = max_call_depth {
                options = options.with_max_call_depth(depth);
            }
            if let Some(limit) = thrash_limit {
                options = options.with_thrash_limit(limit);
            }
            run_script(&entry, options)?
        }
        Commands::Dump {
            entry,
            no_debug_hooks,
        } => dump_script(&entry, no_debug_hooks)?,
    }

    Ok(())
}

fn read_source(entry: &Path) -> Result<String> {
    std::fs::read_to_string(entry).with_context(|| format!("reading {}", entry.display()))
}

fn run_script(entry: &Path, options: VmOptions) -> Result<()> {
    let source = read_source(entry)?;
    let mut runtime = VmRuntime::new(options);
    match runtime.run(&source) {
        Ok(_) => Ok(()),
        // VM errors carry `Rc` values and cannot cross into anyhow as-is
        Err(VmError::Exception(thrown)) => Err(anyhow::anyhow!("Uncaught {}", thrown.message)),
        Err(err) => Err(anyhow::anyhow!("{err}")).with_context(|| format!("running {}", entry.display())),
    }
}

fn dump_script(entry: &Path, no_debug_hooks: bool) -> Result<()> {
    let source = read_source(entry)?;
    let config = GeneratorConfig::default().with_debug_hooks(!no_debug_hooks);
    let unit = Compiler::with_config(config)
        .compile_program(&source)
        .with_context(|| format!("compiling {}", entry.display()))?;
    print!("{}", disassemble(&unit));
    Ok(())
}
