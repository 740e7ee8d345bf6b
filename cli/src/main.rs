use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossterm::style::{style, Color, Stylize};

use simdparck_commons::{parse_charset, HashAlgorithm};
use simdparck_core::{Action, TableConfig, TableType, DEFAULT_BITMASK_SIZE};

/// All the hash types supported.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum HashAlgorithmArg {
    Md4,
    Md5,
    Ntlm,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl From<HashAlgorithmArg> for HashAlgorithm {
    fn from(arg: HashAlgorithmArg) -> Self {
        match arg {
            HashAlgorithmArg::Md4 => HashAlgorithm::Md4,
            HashAlgorithmArg::Md5 => HashAlgorithm::Md5,
            HashAlgorithmArg::Ntlm => HashAlgorithm::Ntlm,
            HashAlgorithmArg::Sha1 => HashAlgorithm::Sha1,
            HashAlgorithmArg::Sha256 => HashAlgorithm::Sha256,
            HashAlgorithmArg::Sha384 => HashAlgorithm::Sha384,
            HashAlgorithmArg::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TableTypeArg {
    Compressed,
    Uncompressed,
}

impl From<TableTypeArg> for TableType {
    fn from(arg: TableTypeArg) -> Self {
        match arg {
            TableTypeArg::Compressed => TableType::Compressed,
            TableTypeArg::Uncompressed => TableType::Uncompressed,
        }
    }
}

/// simdparck is a SIMD-lane rainbow table suite.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Build(Build),
    Resume(Build),
    Crack(Crack),
    Test(Test),
    Info(Info),
    Compress(Convert),
    Decompress(Decompress),
    Sort(Sort),
}

/// Build a rainbow table (or `resume` one that was interrupted).
#[derive(Args)]
struct Build {
    /// The table file to build.
    table: PathBuf,

    /// The hash algorithm to invert.
    #[arg(short, long, value_enum, default_value = "ntlm")]
    algorithm: HashAlgorithmArg,

    /// The minimum plaintext length.
    #[arg(long, default_value_t = 1)]
    min: u8,

    /// The maximum plaintext length.
    #[arg(long, default_value_t = 8)]
    max: u8,

    /// The chain length in hash/reduce iterations.
    #[arg(short, long, default_value_t = 1000)]
    length: u64,

    /// The number of chains. Derived from the keyspace when omitted.
    #[arg(short, long)]
    count: Option<u64>,

    /// Worker threads; 0 means hardware concurrency.
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Chains per work block; must be a multiple of the lane count.
    #[arg(short, long, default_value_t = 1024)]
    blocksize: u64,

    /// A charset preset name or a literal charset.
    #[arg(long, default_value = "ascii")]
    charset: String,

    /// The on-disk record format.
    #[arg(long = "type", value_enum, default_value = "compressed")]
    table_type: TableTypeArg,
}

/// Find the plaintext behind a digest, or behind a file of digests.
#[derive(Args)]
struct Crack {
    /// The table file to search.
    table: PathBuf,

    /// A hex digest, or a path to a file of line-separated hex digests.
    target: String,

    /// Worker threads; 0 means hardware concurrency.
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Skip building the endpoint prefix index.
    #[arg(long)]
    noindex: bool,

    /// The prefix index bitmask size in bits.
    #[arg(long, default_value_t = DEFAULT_BITMASK_SIZE)]
    bitmask: usize,

    /// Separator between digest and plaintext on output.
    #[arg(long, default_value_t = ':')]
    separator: char,

    /// Write results here instead of standard output.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write digests that failed to crack to this file.
    #[arg(long)]
    uncracked: Option<PathBuf>,
}

/// Hash a known plaintext with the table's algorithm, then crack it.
#[derive(Args)]
struct Test {
    /// The table file to search.
    table: PathBuf,

    /// The plaintext to round-trip.
    plaintext: String,

    /// Worker threads; 0 means hardware concurrency.
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
}

/// Print the header and coverage of a table.
#[derive(Args)]
struct Info {
    table: PathBuf,
}

/// Convert an uncompressed table to the compressed format.
#[derive(Args)]
struct Convert {
    /// The source table.
    source: PathBuf,

    /// The destination table.
    destination: PathBuf,
}

/// Convert a compressed table to the uncompressed format.
#[derive(Args)]
struct Decompress {
    /// The source table.
    source: PathBuf,

    /// The destination table. Defaults to the source with a `.utbl`
    /// extension.
    destination: Option<PathBuf>,
}

/// Sort an uncompressed table by endpoint, in place.
#[derive(Args)]
struct Sort {
    table: PathBuf,
}

/// Resolves a preset name, falling back to a literal charset.
fn resolve_charset(arg: &str) -> Result<Vec<u8>> {
    if let Some(preset) = parse_charset(arg) {
        return Ok(preset.to_vec());
    }

    ensure!(
        arg.is_ascii() && !arg.is_empty(),
        "unknown charset preset and not a usable literal charset: {arg:?}"
    );
    Ok(arg.as_bytes().to_vec())
}

fn config_for(table: PathBuf) -> TableConfig {
    TableConfig {
        path: table,
        algorithm: HashAlgorithm::Ntlm,
        table_type: TableType::Compressed,
        min: 1,
        max: 8,
        length: 1000,
        count: 0,
        blocksize: 1024,
        threads: 0,
        charset: simdparck_commons::ASCII.to_vec(),
        bitmask_size: DEFAULT_BITMASK_SIZE,
        use_index: true,
        separator: ':',
    }
}

fn build_config(args: &Build) -> Result<TableConfig> {
    let mut config = config_for(args.table.clone());
    config.algorithm = args.algorithm.into();
    config.table_type = args.table_type.into();
    config.min = args.min as usize;
    config.max = args.max as usize;
    config.length = args.length;
    config.count = args.count.unwrap_or(0);
    config.threads = args.threads;
    config.blocksize = args.blocksize;
    config.charset = resolve_charset(&args.charset)?;
    Ok(config)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = try_main() {
        eprintln!("{}", style(format!("{err:?}")).with(Color::Red));
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let (config, action) = match cli.command {
        Commands::Build(args) => (build_config(&args)?, Action::Build),
        Commands::Resume(args) => (build_config(&args)?, Action::Resume),
        Commands::Crack(args) => {
            let mut config = config_for(args.table.clone());
            config.threads = args.threads;
            config.use_index = !args.noindex;
            config.bitmask_size = args.bitmask;
            config.separator = args.separator;
            (
                config,
                Action::Crack {
                    target: args.target,
                    output: args.output,
                    uncracked: args.uncracked,
                },
            )
        }
        Commands::Test(args) => {
            let mut config = config_for(args.table.clone());
            config.threads = args.threads;
            (
                config,
                Action::Test {
                    plaintext: args.plaintext,
                },
            )
        }
        Commands::Info(args) => (config_for(args.table), Action::Info),
        Commands::Compress(args) => {
            let config = config_for(args.source);
            ensure!(
                config.path.exists(),
                "source table {} not found",
                config.path.display()
            );
            (
                config,
                Action::Compress {
                    destination: args.destination,
                },
            )
        }
        Commands::Decompress(args) => (
            config_for(args.source),
            Action::Decompress {
                destination: args.destination,
            },
        ),
        Commands::Sort(args) => (config_for(args.table), Action::Sort),
    };

    if !matches!(action, Action::Build) {
        ensure!(
            config.path.exists(),
            "table {} not found",
            config.path.display()
        );
        if matches!(action, Action::Resume) && !simdparck_core::TableFile::is_table_file(&config.path)
        {
            bail!("provided table not found or invalid");
        }
    }

    simdparck_core::run(config, action).context("operation failed")
}
