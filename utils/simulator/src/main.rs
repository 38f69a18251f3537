use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use verisim::{BuildRequest, Config, ModelSymbols, SignalDirectory, Toolchain, Verilator};

#[derive(Parser)]
#[command(name = "verisim")]
#[command(about = "Build Verilator models and inspect their signal trees")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the IO and internals trees described by a symbol table
    Inspect {
        #[arg(value_name = "SYMBOLS")]
        symbols: Utf8PathBuf,
    },
    /// Compile HDL sources into a loadable model
    Build {
        #[arg(value_name = "SOURCES", required = true)]
        sources: Vec<Utf8PathBuf>,

        /// Top module (default: stem of the first source)
        #[arg(long)]
        top: Option<String>,

        /// Extra flag passed to verilator, may be repeated
        #[arg(long = "flag", value_name = "FLAG", allow_hyphen_values = true)]
        flags: Vec<String>,
    },
}

fn inspect(path: &Utf8PathBuf) -> Result<()> {
    let symbols =
        ModelSymbols::load(path).with_context(|| format!("Failed to load symbols from {path}"))?;
    let directory = SignalDirectory::from_symbols(&symbols)
        .with_context(|| format!("Invalid symbol table in {path}"))?;
    print!("{}", directory.render());
    Ok(())
}

fn build(
    config: &Config,
    sources: Vec<Utf8PathBuf>,
    top: Option<String>,
    flags: Vec<String>,
) -> Result<()> {
    let mut request = BuildRequest::new(sources).with_flags(flags);
    if let Some(top) = top {
        request = request.with_top(top);
    }
    let toolchain = Verilator::new(config.toolchain.clone());
    let artifact = toolchain
        .compile(&request)
        .context("Verilator build failed")?;

    println!("library: {}", artifact.library);
    println!("symbols: {}", artifact.symbols);
    inspect(&artifact.symbols)
}

fn main() -> Result<()> {
    colog::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    match args.command {
        Command::Inspect { symbols } => inspect(&symbols),
        Command::Build {
            sources,
            top,
            flags,
        } => build(&config, sources, top, flags),
    }
}
