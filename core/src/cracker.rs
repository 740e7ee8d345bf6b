//! Iteration-parallel inversion over a built table.
//!
//! A target digest is assumed, in turn, to sit at each column of some
//! chain; forward-iterating from that column yields a candidate endpoint,
//! and an endpoint hit triggers one full chain walk from the stored
//! startpoint. Endpoint collisions between different chains surface here
//! as validation misses, which cost time but never correctness.

use std::io::{BufRead, Write};

use log::{info, warn};
use rayon::prelude::*;

use simdparck_commons::{HashAlgorithm, MAX_PASSWORD_LENGTH};

use crate::error::CoreResult;
use crate::hash_index::{HashIndex, LINEAR_LOOKUP_THRESHOLD};
use crate::reduce::Reducer;
use crate::table::{Records, TableFile, TableType};
use crate::wordgen::{self, WordGenerator};

pub struct TableCracker<'a> {
    records: Records<'a>,
    index: Option<HashIndex<'a>>,
    generator: WordGenerator,
    reducer: Reducer,
    algorithm: HashAlgorithm,
    hash_width: usize,
    min_index: u64,
    length: u64,
}

impl<'a> TableCracker<'a> {
    /// Binds a mapped table. For sorted uncompressed tables an endpoint
    /// index is built over the record region unless disabled; compressed
    /// tables only ever get the linear scan.
    pub fn new(table: &'a TableFile, use_index: bool, bitmask_size: usize) -> CoreResult<Self> {
        let header = table.header();
        let records = table.records()?;

        let index = if use_index
            && header.table_type == TableType::Uncompressed
            && records.count() >= LINEAR_LOOKUP_THRESHOLD
        {
            info!("indexing {} endpoints", records.count());
            Some(HashIndex::initialize(
                records.data(),
                8,
                8,
                16,
                bitmask_size,
            )?)
        } else {
            None
        };

        Ok(Self {
            records,
            index,
            generator: WordGenerator::new(header.charset()),
            reducer: Reducer::hybrid(header.min as usize, header.max as usize, header.charset()),
            algorithm: header.algorithm,
            hash_width: header.algorithm.digest_size(),
            min_index: wordgen::word_length_index64(header.min as usize, header.charset()),
            length: header.length,
        })
    }

    pub fn hash_width(&self) -> usize {
        self.hash_width
    }

    /// Inverts a single digest. Iterations are searched from `length - 1`
    /// down to 0 across the current rayon pool; the first confirmed hit
    /// wins and the other workers drain out.
    pub fn crack(&self, target: &[u8]) -> Option<String> {
        (0..self.length as usize)
            .into_par_iter()
            .rev()
            .find_map_any(|iteration| self.check_iteration(target, iteration as u64))
    }

    /// The single-threaded scan, identical result set to [`crack`].
    pub fn crack_serial(&self, target: &[u8]) -> Option<String> {
        (0..self.length).rev().find_map(|i| self.check_iteration(target, i))
    }

    /// Assumes the target sits `iteration` reductions into some chain:
    /// forward-iterates to the supposed endpoint and, on an endpoint hit,
    /// validates the full chain.
    fn check_iteration(&self, target: &[u8], iteration: u64) -> Option<String> {
        let mut word = [0u8; MAX_PASSWORD_LENGTH];
        let mut digest = simdparck_commons::Digest::new();
        digest.extend_from_slice(target);

        for column in iteration..self.length.saturating_sub(1) {
            let length = self.reducer.reduce(&mut word, &digest, column);
            digest = self.algorithm.hash(&word[..length]);
        }

        let length = self.reducer.reduce(&mut word, &digest, self.length - 1);
        let endpoint = self.generator.parse_reversed(&word[..length]);

        let startpoint = self.find_start_for_endpoint(endpoint)?;
        self.validate_chain(startpoint, target)
    }

    /// Endpoint lookup. Uncompressed tables are endpoint-sorted, so the
    /// prefix index (or a plain binary search) applies; compressed tables
    /// are in startpoint order and only support the linear scan.
    fn find_start_for_endpoint(&self, endpoint: u64) -> Option<u64> {
        match self.records.table_type() {
            TableType::Compressed => self
                .records
                .find_endpoint_linear(endpoint)
                .map(|record| record.startpoint),
            TableType::Uncompressed => match &self.index {
                Some(index) => index
                    .find(&endpoint.to_le_bytes())
                    .map(|row| self.records.record_at(row).startpoint),
                None => self
                    .records
                    .find_endpoint(endpoint)
                    .map(|record| record.startpoint),
            },
        }
    }

    /// Recomputes the chain seeded by `chain_index` and scans it for the
    /// target digest. A mismatch short of the endpoint is a miss, not an
    /// error.
    fn validate_chain(&self, chain_index: u64, target: &[u8]) -> Option<String> {
        let mut word = [0u8; MAX_PASSWORD_LENGTH];
        let mut length = self
            .generator
            .generate_into(&mut word, self.min_index + chain_index);

        for iteration in 0..self.length {
            let digest = self.algorithm.hash(&word[..length]);
            if &digest[..] == target {
                return Some(String::from_utf8_lossy(&word[..length]).into_owned());
            }
            length = self.reducer.reduce(&mut word, &digest, iteration);
        }

        None
    }

    /// Batch mode: one line-separated hex digest per line. Hits go to
    /// `output` as `digest{separator}plaintext`; misses go to the
    /// uncrackable stream when one is configured. A miss is not an error.
    pub fn crack_stream<R: BufRead, W: Write, U: Write>(
        &self,
        input: R,
        output: &mut W,
        mut uncracked: Option<&mut U>,
        separator: char,
    ) -> CoreResult<(u64, u64)> {
        let mut cracked = 0u64;
        let mut total = 0u64;

        for line in input.lines() {
            let line = line?;
            let digest_hex = line.trim();
            if digest_hex.is_empty() {
                continue;
            }
            total += 1;

            let target = match hex::decode(digest_hex) {
                Ok(target) if target.len() == self.hash_width => target,
                _ => {
                    warn!("invalid digest of length {}: {digest_hex}", digest_hex.len());
                    if let Some(stream) = uncracked.as_mut() {
                        writeln!(stream, "{digest_hex}")?;
                    }
                    continue;
                }
            };

            if let Some(plaintext) = self.crack(&target) {
                cracked += 1;
                writeln!(output, "{digest_hex}{separator}{plaintext}")?;
            } else if let Some(stream) = uncracked.as_mut() {
                writeln!(stream, "{digest_hex}")?;
            }

            eprint!("\rCracked {cracked}/{total}");
        }

        if total > 0 {
            eprintln!();
        }
        Ok((cracked, total))
    }
}
