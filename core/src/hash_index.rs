//! Prefix-bucketed directory over a sorted region of fixed-width records.
//!
//! The region is split into 2^b buckets named by the top `b` bits of the
//! big-endian interpretation of the first four key bytes. Bucket
//! construction samples the region sparsely instead of touching every
//! record, which matters when the region is a memory map that is not yet
//! resident. Lookups are a binary search inside one bucket.

use log::debug;
use rayon::prelude::*;

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_BITMASK_SIZE: usize = 16;
pub const MAX_BITMASK_SIZE: usize = 24;

/// Below this record count a linear scan beats the bucket machinery.
pub const LINEAR_LOOKUP_THRESHOLD: usize = 512;

const INVALID_OFFSET: usize = usize::MAX;

/// The big-endian value of the first four key bytes, shifted down to the
/// top `bitmask_size` bits.
#[inline]
fn key_prefix(key: &[u8], bitmask_size: usize) -> usize {
    let v = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
    (v >> (32 - bitmask_size)) as usize
}

/// Sorts the rows of `data` in place by the byte order of their key window.
pub fn sort_rows(data: &mut [u8], digest_length: usize, digest_offset: usize, row_width: usize) {
    let count = data.len() / row_width;
    let mut order: Vec<usize> = (0..count).collect();

    {
        let data = &*data;
        order.par_sort_unstable_by(|&a, &b| {
            let ka = &data[a * row_width + digest_offset..a * row_width + digest_offset + digest_length];
            let kb = &data[b * row_width + digest_offset..b * row_width + digest_offset + digest_length];
            ka.cmp(kb)
        });
    }

    let mut sorted = vec![0u8; data.len()];
    for (i, &row) in order.iter().enumerate() {
        sorted[i * row_width..(i + 1) * row_width]
            .copy_from_slice(&data[row * row_width..(row + 1) * row_width]);
    }
    data.copy_from_slice(&sorted);
}

/// The bucket directory. Borrows the record region; it must be rebuilt
/// after any re-sort or append, and it is only valid while the owning map
/// stays at the same base.
pub struct HashIndex<'a> {
    data: &'a [u8],
    digest_length: usize,
    digest_offset: usize,
    row_width: usize,
    bitmask_size: usize,
    /// Per bucket: (first row, row count). Empty buckets have count 0.
    buckets: Vec<(usize, usize)>,
}

impl<'a> HashIndex<'a> {
    /// Binds the region and builds the bucket table. The region must
    /// already be sorted by its key window.
    pub fn initialize(
        data: &'a [u8],
        digest_length: usize,
        digest_offset: usize,
        row_width: usize,
        bitmask_size: usize,
    ) -> CoreResult<Self> {
        if !(1..=MAX_BITMASK_SIZE).contains(&bitmask_size) {
            return Err(CoreError::Config(format!(
                "bitmask size {bitmask_size} outside 1..={MAX_BITMASK_SIZE}"
            )));
        }
        if row_width == 0 || data.len() % row_width != 0 {
            return Err(CoreError::Config(
                "data size is not a multiple of the row width".into(),
            ));
        }
        if digest_length < 4 || digest_offset + digest_length > row_width {
            return Err(CoreError::Config(
                "digest window does not fit the row".into(),
            ));
        }

        let mut index = Self {
            data,
            digest_length,
            digest_offset,
            row_width,
            bitmask_size,
            buckets: Vec::new(),
        };
        index.build_buckets()?;
        Ok(index)
    }

    /// Shorthand for a region whose rows are bare digests.
    pub fn initialize_digests(
        data: &'a [u8],
        digest_length: usize,
        bitmask_size: usize,
    ) -> CoreResult<Self> {
        Self::initialize(data, digest_length, 0, digest_length, bitmask_size)
    }

    pub fn count(&self) -> usize {
        self.data.len() / self.row_width
    }

    pub fn bitmask_size(&self) -> usize {
        self.bitmask_size
    }

    #[inline]
    pub fn hash_at(&self, row: usize) -> &[u8] {
        let start = row * self.row_width + self.digest_offset;
        &self.data[start..start + self.digest_length]
    }

    #[inline]
    pub fn row_at(&self, row: usize) -> &[u8] {
        &self.data[row * self.row_width..(row + 1) * self.row_width]
    }

    fn build_buckets(&mut self) -> CoreResult<()> {
        let count = self.count();
        let bucket_count = 1usize << self.bitmask_size;
        let mut offsets = vec![INVALID_OFFSET; bucket_count];

        debug!(
            "indexing {count} rows, width {}, digest {}+{}",
            self.row_width, self.digest_offset, self.digest_length
        );

        if count == 0 {
            self.buckets = vec![(0, 0); bucket_count];
            return Ok(());
        }

        // Sparse sampling pass
        let readahead = (count >> self.bitmask_size).max(1);
        let mut i = 0;
        while i < count {
            let prefix = key_prefix(self.hash_at(i), self.bitmask_size);
            if offsets[prefix] == INVALID_OFFSET {
                offsets[prefix] = i;
            }
            i += readahead;
        }

        // The stride can skip the last record
        let last_prefix = key_prefix(self.hash_at(count - 1), self.bitmask_size);
        if offsets[last_prefix] == INVALID_OFFSET {
            offsets[last_prefix] = count - 1;
        }

        // Backfill: walk each known bucket start backwards. A sampled
        // offset can land mid-bucket, and the record before a bucket start
        // reveals the bucket preceding it.
        let mut pass = 1;
        loop {
            let mut progress = false;
            debug!("bucket backfill pass {pass}");
            pass += 1;

            for bucket in 0..bucket_count {
                if offsets[bucket] == INVALID_OFFSET || offsets[bucket] == 0 {
                    continue;
                }

                while offsets[bucket] > 0 {
                    let previous = offsets[bucket] - 1;
                    let prefix = key_prefix(self.hash_at(previous), self.bitmask_size);
                    if prefix == bucket {
                        offsets[bucket] = previous;
                    } else {
                        if offsets[prefix] == INVALID_OFFSET {
                            offsets[prefix] = previous;
                            progress = true;
                        }
                        break;
                    }
                }
            }

            if !progress {
                break;
            }
        }

        // Each bucket extends to the next non-empty bucket's start
        let mut buckets = vec![(0usize, 0usize); bucket_count];
        let mut next_offset = count;
        for bucket in (0..bucket_count).rev() {
            if offsets[bucket] == INVALID_OFFSET {
                continue;
            }
            if offsets[bucket] > next_offset {
                return Err(CoreError::BucketInvariant);
            }
            buckets[bucket] = (offsets[bucket], next_offset - offsets[bucket]);
            next_offset = offsets[bucket];
        }

        let total: usize = buckets.iter().map(|&(_, len)| len).sum();
        if total != count {
            return Err(CoreError::BucketInvariant);
        }

        self.buckets = buckets;
        Ok(())
    }

    fn find_in_rows(&self, first: usize, count: usize, hash: &[u8]) -> Option<usize> {
        let mut low = 0isize;
        let mut high = count as isize - 1;

        while low <= high {
            let mid = low + (high - low) / 2;
            let row = first + mid as usize;
            match self.hash_at(row).cmp(&hash[..self.digest_length]) {
                std::cmp::Ordering::Equal => return Some(row),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid - 1,
            }
        }

        None
    }

    /// Binary search inside the bucket named by the key prefix.
    /// Returns the global row index of a matching record.
    pub fn find(&self, hash: &[u8]) -> Option<usize> {
        let (first, count) = self.buckets[key_prefix(hash, self.bitmask_size)];
        if count == 0 {
            return None;
        }
        self.find_in_rows(first, count, hash)
    }

    pub fn lookup(&self, hash: &[u8]) -> bool {
        self.find(hash).is_some()
    }

    /// Full scan, for regions too small to be worth indexing.
    pub fn find_linear(&self, hash: &[u8]) -> Option<usize> {
        (0..self.count()).find(|&row| self.hash_at(row) == &hash[..self.digest_length])
    }

    pub fn lookup_linear(&self, hash: &[u8]) -> bool {
        self.find_linear(hash).is_some()
    }
}

/// The packed record of the word-store databases:
/// `index:26 | length:6` in a little-endian word, then a 48-bit digest
/// prefix. Only the bit-exact packing round-trip lives here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashRecord {
    pub index: u32,
    pub length: u8,
    pub prefix: [u8; 6],
}

impl HashRecord {
    pub const WIDTH: usize = 10;
    pub const INDEX_BITS: u32 = 26;
    pub const LENGTH_BITS: u32 = 6;

    pub fn pack(&self) -> [u8; Self::WIDTH] {
        let mut out = [0u8; Self::WIDTH];
        let word = (self.index & ((1 << Self::INDEX_BITS) - 1))
            | ((self.length as u32) << Self::INDEX_BITS);
        out[..4].copy_from_slice(&word.to_le_bytes());
        out[4..].copy_from_slice(&self.prefix);
        out
    }

    pub fn unpack(raw: &[u8; Self::WIDTH]) -> Self {
        let word = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let mut prefix = [0u8; 6];
        prefix.copy_from_slice(&raw[4..]);
        Self {
            index: word & ((1 << Self::INDEX_BITS) - 1),
            length: (word >> Self::INDEX_BITS) as u8,
            prefix,
        }
    }
}
