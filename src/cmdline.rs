use crate::bench::{init, interrupt_on_ctrlc, Runner};
use crate::engines::registered;
use crate::error::Result;
use clap::ValueHint::FilePath;
use clap::{Args, Parser, Subcommand};
use log::{debug, error};
use std::fs::read_to_string;

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(short = 's')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the storage engine's TOML config file")]
    engine_config: String,

    #[arg(short = 'b')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's TOML config file")]
    benchmark_config: String,

    #[arg(short = 'o')]
    #[arg(help = "Engine-specific option, may be repeated")]
    options: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a benchmark")]
    Bench(BenchArgs),
    #[command(about = "List all registered storage engines")]
    List,
}

fn bench_cli(args: &BenchArgs) -> Result<()> {
    let opt: String = read_to_string(args.engine_config.as_str())?
        + "\n"
        + &read_to_string(args.benchmark_config.as_str())?;

    let mut opt = init(&opt)?;
    opt.benchmark
        .engine_options
        .extend(args.options.iter().cloned());
    let runner = Runner::new(&opt.engine, opt.benchmark)?;
    interrupt_on_ctrlc(&runner);
    runner.run()?;
    Ok(())
}

fn list_cli() {
    for name in registered() {
        println!("Registered engine: {}", name);
    }
}

/// The default command line interface.
///
/// This function is public and can be called in a different crate. For example, one can integrate
/// their own storage engines by registering the constructor function. Then, adding this function
/// will produce a benchmark binary that has the same usage as the one in this crate.
///
/// ## Usage
///
/// To get the usage of the command line interface, users can run:
///
/// ```bash
/// kvarena -h
/// ```
///
/// The interface supports two modes, `bench` and `list`.
///
/// ### Benchmark Mode
///
/// Usage:
///
/// ```bash
/// kvarena bench -s <ENGINE_CONFIG> -b <BENCH_CONFIG> [-o <OPTION>]...
/// ```
///
/// Where `ENGINE_CONFIG` and `BENCH_CONFIG` are the paths to the storage engine and benchmark
/// configuration files, respectively. For their format, you can refer to the documentations of
/// [`crate::engines`] and [`crate::bench`]. Every `-o` is appended to `engine_options`.
///
/// Ctrl-C stops the workers at their next pass boundary. A failed or interrupted run exits with
/// status 1.
///
/// ### List mode
///
/// Usage:
/// ``` bash
/// kvarena list
/// ```
///
/// This command lists all registered storage engines' names.
pub fn cmdline() {
    env_logger::init();
    let cli = Cli::parse();
    debug!("Starting kvarena with args: {:?}", cli);
    match cli.command {
        Commands::Bench(args) => {
            if let Err(e) = bench_cli(&args) {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        Commands::List => list_cli(),
    }
}
