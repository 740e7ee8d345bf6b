//! Concurrent table generation.
//!
//! Workers own one block id at a time and advance by the thread count, so
//! block ids partition the chain range deterministically. Completed blocks
//! travel over a channel to the commit loop, which writes them in strictly
//! increasing block-id order; the compressed format depends on that order
//! because the record position encodes the startpoint. Out-of-order
//! arrivals wait in a small map. Blocks are never merged or split, so an
//! interrupted build leaves a file of whole records.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, WriteBytesExt};
use crossbeam_channel::{unbounded, Sender};
use log::info;

use simdparck_commons::Password;

use crate::error::CoreResult;
use crate::executive::TableConfig;
use crate::lanes::LaneDriver;
use crate::reduce::Reducer;
use crate::table::{TableFile, TableRecord, TableType};
use crate::util::num_factor;
use crate::wordgen::{self, WordGenerator};

enum BuildMessage {
    Block {
        thread_id: usize,
        block_id: u64,
        records: Vec<TableRecord>,
        elapsed: Duration,
    },
    ThreadComplete,
}

pub struct TableBuilder<'a> {
    config: &'a TableConfig,
    starting_chains: u64,
    min_index: u64,
    terminal_width: usize,
}

impl<'a> TableBuilder<'a> {
    /// The table file must already exist with a valid header; `resume`
    /// continues from whatever chain count is on disk.
    pub fn new(config: &'a TableConfig, starting_chains: u64) -> Self {
        let terminal_width = crossterm::terminal::size()
            .map(|(w, _)| w as usize)
            .unwrap_or(80);

        Self {
            config,
            starting_chains,
            min_index: wordgen::word_length_index64(config.min, &config.charset),
            terminal_width,
        }
    }

    pub fn run(&self, table: &TableFile) -> CoreResult<()> {
        let mut writer = table.open_append()?;
        let threads = self.config.effective_threads();

        info!(
            "building {} chains in blocks of {} on {threads} threads, {} already present",
            self.config.count, self.config.blocksize, self.starting_chains
        );

        let result = thread::scope(|scope| {
            let (sender, receiver) = unbounded();

            for thread_id in 0..threads {
                let sender = sender.clone();
                scope.spawn(move || self.generate_blocks(thread_id, threads, sender));
            }
            drop(sender);

            self.commit_loop(receiver, &mut writer, threads)
        });

        writer.sync_all()?;
        result
    }

    /// Worker loop: one block of chains per message, next block id
    /// `current + threads`.
    fn generate_blocks(&self, thread_id: usize, threads: usize, sender: Sender<BuildMessage>) {
        let config = self.config;
        let generator = WordGenerator::new(&config.charset);
        let reducer = Reducer::hybrid(config.min, config.max, &config.charset);
        let mut driver = LaneDriver::new(config.algorithm);
        let lanes = driver.lanes() as u64;

        let mut block_id = thread_id as u64;
        loop {
            let block_start = self.starting_chains + block_id * config.blocksize;
            if block_start >= config.count {
                let _ = sender.send(BuildMessage::ThreadComplete);
                return;
            }

            let started = Instant::now();
            let mut records = Vec::with_capacity(config.blocksize as usize);
            let mut counter = self.min_index + block_start;

            for group in 0..config.blocksize / lanes {
                for lane in 0..lanes as usize {
                    let length = generator.generate_into(driver.word_buffer(lane), counter);
                    driver.set_length(lane, length);
                    counter += 1;
                }

                for iteration in 0..config.length {
                    driver.hash_lanes();
                    driver.reduce_lanes(&reducer, iteration);
                }

                for lane in 0..lanes as usize {
                    let endpoint = generator.parse_reversed(driver.word(lane));
                    records.push(TableRecord {
                        startpoint: block_start + group * lanes + lane as u64,
                        endpoint,
                    });
                }
            }

            let message = BuildMessage::Block {
                thread_id,
                block_id,
                records,
                elapsed: started.elapsed(),
            };
            if sender.send(message).is_err() {
                // commit loop bailed out
                return;
            }

            block_id += threads as u64;
        }
    }

    /// Single-writer commit loop. Returns once every worker has reported
    /// past-the-end.
    fn commit_loop(
        &self,
        receiver: crossbeam_channel::Receiver<BuildMessage>,
        writer: &mut File,
        threads: usize,
    ) -> CoreResult<()> {
        let mut next_block = 0u64;
        let mut cache: BTreeMap<u64, Vec<TableRecord>> = BTreeMap::new();
        let mut timers = vec![Duration::ZERO; threads];
        let mut chains_written = 0u64;
        let mut completed = 0;

        while completed < threads {
            match receiver.recv() {
                Ok(BuildMessage::Block {
                    thread_id,
                    block_id,
                    records,
                    elapsed,
                }) => {
                    timers[thread_id] = elapsed;
                    let endpoint =
                        wordgen::generate_reversed(records[0].endpoint, &self.config.charset);
                    self.output_status(chains_written, &timers, &endpoint);

                    if block_id == next_block {
                        chains_written += self.write_block(writer, &records)?;
                        next_block += 1;
                        while let Some(buffered) = cache.remove(&next_block) {
                            chains_written += self.write_block(writer, &buffered)?;
                            next_block += 1;
                        }
                    } else {
                        cache.insert(block_id, records);
                    }
                }
                Ok(BuildMessage::ThreadComplete) => completed += 1,
                Err(_) => break,
            }
        }

        eprintln!();
        info!("wrote {chains_written} chains");
        Ok(())
    }

    /// One contiguous write per block, in the current type's record width.
    fn write_block(&self, writer: &mut File, records: &[TableRecord]) -> CoreResult<u64> {
        let width = self.config.table_type.record_width();
        let mut buffer = Vec::with_capacity(records.len() * width);

        match self.config.table_type {
            TableType::Uncompressed => {
                for record in records {
                    buffer.write_u64::<LittleEndian>(record.startpoint)?;
                    buffer.write_u64::<LittleEndian>(record.endpoint)?;
                }
            }
            TableType::Compressed => {
                for record in records {
                    buffer.write_u64::<LittleEndian>(record.endpoint)?;
                }
            }
        }

        writer.write_all(&buffer)?;
        writer.flush()?;
        Ok(records.len() as u64)
    }

    /// Best-effort rolling status. A failure to write it never fails the
    /// build.
    fn output_status(&self, chains_written: u64, timers: &[Duration], last_endpoint: &Password) {
        let total_ms: u64 = timers.iter().map(|d| d.as_millis() as u64).sum();
        let average_ms = total_ms / timers.len() as u64;
        if average_ms == 0 {
            return;
        }

        let chains_per_sec = 1000.0 * self.config.blocksize as f64 / average_ms as f64;
        let hashes_per_sec = chains_per_sec * self.config.length as f64;
        let chains = (self.starting_chains + chains_written) as f64;
        let percent = chains / self.config.count as f64 * 100.0;

        let (chains, chains_suffix) = num_factor(chains);
        let (cps, cps_suffix) = num_factor(chains_per_sec);
        let (hps, hps_suffix) = num_factor(hashes_per_sec);

        let mut status = format!(
            "C:{chains:.1}{chains_suffix}({percent:.1}%) C/s:{cps:.1}{cps_suffix} \
             H/s:{hps:.1}{hps_suffix} E:\"{last_endpoint}\""
        );

        if status.len() > self.terminal_width {
            status.truncate(self.terminal_width);
        } else {
            let padding = self.terminal_width - status.len();
            status.extend(std::iter::repeat(' ').take(padding));
        }

        eprint!("\r{status}");
    }
}
