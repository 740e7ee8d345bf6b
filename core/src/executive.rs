//! Top-level orchestration: validate the configuration completely, then
//! drive one action over one table file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::{info, warn};

use simdparck_commons::{HashAlgorithm, MAX_CHARSET_LENGTH, MAX_PASSWORD_LENGTH};

use crate::builder::TableBuilder;
use crate::cracker::TableCracker;
use crate::error::{CoreError, CoreResult};
use crate::hash_index::MAX_BITMASK_SIZE;
use crate::lanes::simd_lanes;
use crate::table::{TableFile, TableHeader, TableType, HEADER_SIZE};
use crate::util::{is_hex, num_factor, size_factor};
use crate::wordgen;

/// Everything one run needs. Populated by the CLI, then completed from the
/// table header when the file already exists.
#[derive(Clone, Debug)]
pub struct TableConfig {
    pub path: PathBuf,
    pub algorithm: HashAlgorithm,
    pub table_type: TableType,
    pub min: usize,
    pub max: usize,
    pub length: u64,
    /// Number of chains to build; 0 means derive from the keyspace.
    pub count: u64,
    pub blocksize: u64,
    /// 0 means hardware concurrency.
    pub threads: usize,
    pub charset: Vec<u8>,
    pub bitmask_size: usize,
    pub use_index: bool,
    pub separator: char,
}

impl TableConfig {
    pub fn effective_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Overrides the keyspace parameters with the ones persisted in a
    /// table header. The header always wins over the command line.
    pub fn adopt_header(&mut self, header: &TableHeader) {
        self.algorithm = header.algorithm;
        self.table_type = header.table_type;
        self.min = header.min as usize;
        self.max = header.max as usize;
        self.length = header.length;
        self.charset = header.charset().to_vec();
    }

    /// Full validation, performed before any I/O.
    pub fn validate(&self) -> CoreResult<()> {
        let config_error = |reason: String| Err(CoreError::Config(reason));

        if self.path.as_os_str().is_empty() {
            return config_error("no rainbow table file specified".into());
        }
        if self.min == 0 {
            return config_error("no min length specified".into());
        }
        if self.max == 0 {
            return config_error("no max length specified".into());
        }
        if self.min > self.max {
            return config_error(format!("min {} exceeds max {}", self.min, self.max));
        }
        if self.max > MAX_PASSWORD_LENGTH {
            return config_error(format!(
                "max length is above the supported maximum {MAX_PASSWORD_LENGTH}"
            ));
        }
        if self.length == 0 {
            return config_error("no chain length specified".into());
        }
        if self.blocksize == 0 {
            return config_error("no block size specified".into());
        }
        if self.blocksize % simd_lanes() as u64 != 0 {
            return config_error(format!(
                "block size must be a multiple of the lane count ({})",
                simd_lanes()
            ));
        }
        if self.charset.is_empty() {
            return config_error("no or invalid charset specified".into());
        }
        if self.charset.len() > MAX_CHARSET_LENGTH {
            return config_error(format!(
                "charset exceeds the maximum of {MAX_CHARSET_LENGTH} characters"
            ));
        }
        let mut seen = [false; 256];
        for &c in &self.charset {
            if !c.is_ascii() {
                return config_error("charset must be ASCII".into());
            }
            if seen[c as usize] {
                return config_error(format!("duplicate charset byte {:?}", c as char));
            }
            seen[c as usize] = true;
        }
        if !(1..=MAX_BITMASK_SIZE).contains(&self.bitmask_size) {
            return config_error(format!(
                "bitmask size {} outside 1..={MAX_BITMASK_SIZE}",
                self.bitmask_size
            ));
        }

        // 64-bit indices only: the whole keyspace must fit the platform
        // integer.
        let upper = wordgen::word_length_index(self.max + 1, &self.charset);
        if upper > u64::MAX as u128 {
            return Err(CoreError::Space((128 - upper.leading_zeros()) as u8));
        }

        Ok(())
    }

    fn keyspace(&self) -> u128 {
        wordgen::keyspace(self.min, self.max, &self.charset)
    }
}

/// One action over one table.
#[derive(Clone, Debug)]
pub enum Action {
    Build,
    Resume,
    Crack {
        target: String,
        output: Option<PathBuf>,
        uncracked: Option<PathBuf>,
    },
    Test {
        plaintext: String,
    },
    Info,
    Compress {
        destination: PathBuf,
    },
    Decompress {
        destination: Option<PathBuf>,
    },
    Sort,
}

pub fn run(mut config: TableConfig, action: Action) -> CoreResult<()> {
    match action {
        Action::Build => build(&mut config, false),
        Action::Resume => build(&mut config, true),
        Action::Crack {
            target,
            output,
            uncracked,
        } => crack(&mut config, &target, output, uncracked),
        Action::Test { plaintext } => test(&mut config, &plaintext),
        Action::Info => show_info(&config),
        Action::Compress { destination } => convert(&config, TableType::Compressed, destination),
        Action::Decompress { destination } => {
            let destination =
                destination.unwrap_or_else(|| config.path.with_extension("utbl"));
            convert(&config, TableType::Uncompressed, destination)
        }
        Action::Sort => sort(&config),
    }
}

fn build(config: &mut TableConfig, resume: bool) -> CoreResult<()> {
    let exists = TableFile::is_table_file(&config.path);
    if resume && !exists {
        return Err(CoreError::Config(
            "cannot resume: table not found or invalid".into(),
        ));
    }
    if !exists && config.path.exists() {
        return Err(CoreError::Config(format!(
            "{} exists but is not a rainbow table",
            config.path.display()
        )));
    }

    if exists {
        let table = TableFile::load(&config.path)?;
        config.adopt_header(table.header());
    }

    config.validate()?;

    if config.count == 0 {
        let mut chains = config.keyspace() / (config.length as u128 + 1);
        chains += chains / 10;
        config.count = chains.min(u64::MAX as u128) as u64;
        info!("calculated chains required: {}", config.count);
    }
    if config.count as u128 > config.keyspace() {
        warn!(
            "count {} exceeds the keyspace, clamping to {}",
            config.count,
            config.keyspace()
        );
        config.count = config.keyspace() as u64;
    }

    let (compressed_size, compressed_suffix) = size_factor(
        HEADER_SIZE as f64
            + config.count as f64 * TableType::Compressed.record_width() as f64,
    );
    let (plain_size, plain_suffix) = size_factor(
        HEADER_SIZE as f64
            + config.count as f64 * TableType::Uncompressed.record_width() as f64,
    );
    info!(
        "estimated table size: {compressed_size:.2} {compressed_suffix} compressed \
         ({plain_size:.2} {plain_suffix} uncompressed)"
    );

    if !exists {
        let header = TableHeader::new(
            config.table_type,
            config.algorithm,
            config.min as u8,
            config.max as u8,
            config.length,
            &config.charset,
        )?;
        TableFile::create(&config.path, header)?;
    }

    let table = TableFile::load(&config.path)?;
    let starting_chains = table.count()?;
    TableBuilder::new(config, starting_chains).run(&table)
}

fn crack(
    config: &mut TableConfig,
    target: &str,
    output: Option<PathBuf>,
    uncracked: Option<PathBuf>,
) -> CoreResult<()> {
    let mut table = TableFile::load(&config.path)?;
    config.adopt_header(table.header());
    config.validate()?;

    if !is_hex(target) && !PathBuf::from(target).exists() {
        return Err(CoreError::Config(
            "target is neither a hex digest nor a file of digests".into(),
        ));
    }

    table.map(true)?;
    let cracker = TableCracker::new(&table, config.use_index, config.bitmask_size)?;

    let mut out: Box<dyn Write + Send> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout()),
    };

    let threads = config.effective_threads();
    if is_hex(target) {
        if target.len() != cracker.hash_width() * 2 {
            return Err(CoreError::Config(format!(
                "invalid length of provided hash: {} != {}",
                target.len(),
                cracker.hash_width() * 2
            )));
        }
        let digest = hex::decode(target)
            .map_err(|_| CoreError::Config("target is not valid hexadecimal".into()))?;

        let result = if threads == 1 {
            cracker.crack_serial(&digest)
        } else {
            let pool = build_pool(threads)?;
            pool.install(|| cracker.crack(&digest))
        };

        if let Some(plaintext) = result {
            writeln!(out, "{target}{}{plaintext}", config.separator)?;
        }
    } else {
        let input = BufReader::new(File::open(target)?);
        let mut uncracked_file = match uncracked {
            Some(path) => Some(File::create(path)?),
            None => None,
        };

        let pool = build_pool(threads)?;
        let (cracked, total) = pool.install(|| {
            cracker.crack_stream(input, &mut out, uncracked_file.as_mut(), config.separator)
        })?;
        info!("cracked {cracked} of {total} digests");
    }

    out.flush()?;
    Ok(())
}

fn build_pool(threads: usize) -> CoreResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| CoreError::Config(format!("unable to create the thread pool: {e}")))
}

fn test(config: &mut TableConfig, plaintext: &str) -> CoreResult<()> {
    let table = TableFile::load(&config.path)?;
    let digest = table.header().algorithm.hash(plaintext.as_bytes());
    let digest_hex = hex::encode(&digest[..]);
    println!("Testing for password {plaintext:?}: {digest_hex}");

    crack(config, &digest_hex, None, None)
}

fn show_info(config: &TableConfig) -> CoreResult<()> {
    let table = TableFile::load(&config.path)?;
    let header = table.header();
    let chains = table.count()?;

    let keyspace = wordgen::keyspace(
        header.min as usize,
        header.max as usize,
        header.charset(),
    );
    let coverage = (chains as f64 * header.length as f64) / keyspace as f64 * 100.0;
    let (count, count_suffix) = num_factor(chains as f64);

    println!("Type:        {}", header.table_type);
    println!("Algorithm:   {}", header.algorithm);
    println!("Min:         {}", header.min);
    println!("Max:         {}", header.max);
    println!("Length:      {}", header.length);
    println!("Count:       {chains} ({count:.1}{count_suffix})");
    println!("Charset:     {:?}", String::from_utf8_lossy(header.charset()));
    println!("Charset Len: {}", header.charset().len());
    println!("KS Coverage: {coverage:.4}%");
    Ok(())
}

fn convert(config: &TableConfig, destination_type: TableType, destination: PathBuf) -> CoreResult<()> {
    let mut table = TableFile::load(&config.path)?;
    if table.header().table_type == destination_type {
        return Err(CoreError::Config("won't convert to the same type".into()));
    }

    let converted = table.convert(&destination)?;
    info!(
        "wrote {} chains to {}",
        converted.count()?,
        destination.display()
    );
    Ok(())
}

fn sort(config: &TableConfig) -> CoreResult<()> {
    let mut table = TableFile::load(&config.path)?;
    table.sort_by_endpoint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use simdparck_commons::LOWER;

    fn lower_config() -> TableConfig {
        TableConfig {
            path: PathBuf::from("test.rt"),
            algorithm: HashAlgorithm::Sha1,
            table_type: TableType::Uncompressed,
            min: 1,
            max: 6,
            length: 100,
            count: 0,
            blocksize: 1024,
            threads: 1,
            charset: LOWER.to_vec(),
            bitmask_size: 16,
            use_index: true,
            separator: ':',
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(lower_config().validate().is_ok());
    }

    #[test]
    fn test_zero_fields_rejected() {
        let mutations: [fn(&mut TableConfig); 6] = [
            |c| c.min = 0,
            |c| c.max = 0,
            |c| c.length = 0,
            |c| c.blocksize = 0,
            |c| c.charset.clear(),
            |c| c.path = PathBuf::new(),
        ];

        for mutate in mutations {
            let mut config = lower_config();
            mutate(&mut config);
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_blocksize_must_be_lane_multiple() {
        let mut config = lower_config();
        config.blocksize = simd_lanes() as u64 + 1;
        assert!(config.validate().is_err());
        config.blocksize = simd_lanes() as u64 * 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = lower_config();
        config.min = 7;
        config.max = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_charset_byte_rejected() {
        let mut config = lower_config();
        config.charset = b"abca".to_vec();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keyspace_overflow_detected() {
        let mut config = lower_config();
        // 95 printable characters to the 17th power blows past 2^64
        config.charset = simdparck_commons::ASCII.to_vec();
        config.max = 17;
        assert!(matches!(config.validate(), Err(CoreError::Space(_))));

        config.max = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bitmask_bounds() {
        let mut config = lower_config();
        config.bitmask_size = 0;
        assert!(config.validate().is_err());
        config.bitmask_size = 25;
        assert!(config.validate().is_err());
        config.bitmask_size = 24;
        assert!(config.validate().is_ok());
    }
}
