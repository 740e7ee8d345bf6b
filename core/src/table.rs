//! The on-disk rainbow table: a 144-byte packed header followed by flat
//! records, memory-mapped for cracking and sorting.
//!
//! Uncompressed records are `(startpoint, endpoint)` pairs sorted by the
//! byte order of their endpoint field; compressed records drop the
//! startpoint, which is implied by the record position, and stay in
//! generation order. Any slice derived from the map is invalidated by a
//! remap, so the writable map is an explicit unmap-then-map two-step.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use log::info;
use memmap2::{Mmap, MmapMut};

use simdparck_commons::{HashAlgorithm, MAX_CHARSET_LENGTH};

use crate::error::{CoreError, CoreResult};
use crate::hash_index::sort_rows;

/// ASCII "rt- ", little-endian.
pub const TABLE_MAGIC: u32 = 0x7274_202d;

pub const HEADER_SIZE: usize = 144;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableType {
    Uncompressed,
    Compressed,
}

impl TableType {
    pub fn record_width(&self) -> usize {
        match self {
            TableType::Uncompressed => 16,
            TableType::Compressed => 8,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(TableType::Uncompressed),
            1 => Some(TableType::Compressed),
            _ => None,
        }
    }

    pub fn as_bits(&self) -> u8 {
        match self {
            TableType::Uncompressed => 0,
            TableType::Compressed => 1,
        }
    }
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableType::Uncompressed => write!(f, "Uncompressed"),
            TableType::Compressed => write!(f, "Compressed"),
        }
    }
}

/// An uncompressed chain record. The compressed form is the endpoint only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableRecord {
    pub startpoint: u64,
    pub endpoint: u64,
}

impl TableRecord {
    #[inline]
    pub fn read_le(raw: &[u8]) -> Self {
        Self {
            startpoint: LittleEndian::read_u64(&raw[..8]),
            endpoint: LittleEndian::read_u64(&raw[8..16]),
        }
    }

    /// Sort key putting records in the byte order of their serialized
    /// endpoint, the order the prefix index expects.
    #[inline]
    pub fn endpoint_key(&self) -> u64 {
        self.endpoint.swap_bytes()
    }
}

/// The persisted table parameters. The compatibility contract: magic,
/// one byte packing the type (low 2 bits) with the algorithm (high 6
/// bits), min, max, charset length, chain length, and a fixed 128-byte
/// charset field delimited by the length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableHeader {
    pub table_type: TableType,
    pub algorithm: HashAlgorithm,
    pub min: u8,
    pub max: u8,
    pub length: u64,
    charset: Vec<u8>,
}

impl TableHeader {
    pub fn new(
        table_type: TableType,
        algorithm: HashAlgorithm,
        min: u8,
        max: u8,
        length: u64,
        charset: &[u8],
    ) -> CoreResult<Self> {
        if charset.is_empty() || charset.len() > MAX_CHARSET_LENGTH {
            return Err(CoreError::Config(format!(
                "charset length {} outside 1..={MAX_CHARSET_LENGTH}",
                charset.len()
            )));
        }
        Ok(Self {
            table_type,
            algorithm,
            min,
            max,
            length,
            charset: charset.to_vec(),
        })
    }

    pub fn charset(&self) -> &[u8] {
        &self.charset
    }

    pub fn record_width(&self) -> usize {
        self.table_type.record_width()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(TABLE_MAGIC)?;
        writer.write_u8(self.table_type.as_bits() | ((self.algorithm as u8) << 2))?;
        writer.write_u8(self.min)?;
        writer.write_u8(self.max)?;
        writer.write_u8(self.charset.len() as u8)?;
        writer.write_u64::<LittleEndian>(self.length)?;

        let mut charset = [0u8; MAX_CHARSET_LENGTH];
        charset[..self.charset.len()].copy_from_slice(&self.charset);
        writer.write_all(&charset)
    }

    pub fn read_from<R: Read>(reader: &mut R, path: &Path) -> CoreResult<Self> {
        let format_error = |reason: &str| CoreError::Format {
            path: path.to_path_buf(),
            reason: reason.into(),
        };

        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != TABLE_MAGIC {
            return Err(format_error("bad magic"));
        }

        let packed = reader.read_u8()?;
        let table_type = TableType::from_bits(packed & 0x3)
            .ok_or_else(|| format_error("unknown table type"))?;
        let algorithm = HashAlgorithm::from_bits(packed >> 2)
            .ok_or_else(|| format_error("unknown hash algorithm"))?;

        let min = reader.read_u8()?;
        let max = reader.read_u8()?;
        let charset_len = reader.read_u8()? as usize;
        let length = reader.read_u64::<LittleEndian>()?;

        let mut charset = [0u8; MAX_CHARSET_LENGTH];
        reader.read_exact(&mut charset)?;

        if charset_len == 0 || charset_len > MAX_CHARSET_LENGTH {
            return Err(format_error("invalid charset length"));
        }

        Ok(Self {
            table_type,
            algorithm,
            min,
            max,
            length,
            charset: charset[..charset_len].to_vec(),
        })
    }
}

enum Mapping {
    None,
    ReadOnly(Mmap),
    Writable(MmapMut),
}

/// A rainbow table on disk. Owns the mmap region: any derived slice dies
/// with a remap, and dropping the table unmaps.
pub struct TableFile {
    path: PathBuf,
    header: TableHeader,
    mapping: Mapping,
}

impl TableFile {
    /// Truncates the file and writes the header.
    pub fn create(path: &Path, header: TableHeader) -> CoreResult<Self> {
        let mut file = File::create(path)?;
        header.write_to(&mut file)?;
        file.sync_all()?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            mapping: Mapping::None,
        })
    }

    /// Reads and validates the header. The file is refused when the body
    /// is not a whole number of records.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len() as usize;

        if size < HEADER_SIZE {
            return Err(CoreError::Format {
                path: path.to_path_buf(),
                reason: "not enough data for a table header".into(),
            });
        }

        let header = TableHeader::read_from(&mut file, path)?;

        if (size - HEADER_SIZE) % header.record_width() != 0 {
            return Err(CoreError::Format {
                path: path.to_path_buf(),
                reason: "data is not a multiple of the chain width".into(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            header,
            mapping: Mapping::None,
        })
    }

    /// True when `path` starts with a valid table header.
    pub fn is_table_file(path: &Path) -> bool {
        Self::load(path).is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    /// The number of chains currently stored.
    pub fn count(&self) -> CoreResult<u64> {
        let bytes = match &self.mapping {
            Mapping::ReadOnly(map) => map.len() - HEADER_SIZE,
            Mapping::Writable(map) => map.len() - HEADER_SIZE,
            Mapping::None => std::fs::metadata(&self.path)?.len() as usize - HEADER_SIZE,
        };
        Ok((bytes / self.header.record_width()) as u64)
    }

    pub fn is_mapped(&self) -> bool {
        !matches!(self.mapping, Mapping::None)
    }

    /// Maps the table. Remapping with a different mode is an explicit
    /// unmap-then-map; remapping with the same mode is a no-op.
    pub fn map(&mut self, read_only: bool) -> CoreResult<()> {
        let same_mode = matches!(
            (&self.mapping, read_only),
            (Mapping::ReadOnly(_), true) | (Mapping::Writable(_), false)
        );
        if same_mode {
            return Ok(());
        }
        self.unmap();

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&self.path)?;

        self.mapping = if read_only {
            // SAFETY: the file is not resized or written through another
            // handle while this mapping is alive.
            let map = unsafe { Mmap::map(&file)? };
            #[cfg(unix)]
            {
                map.advise(memmap2::Advice::Random)?;
                map.advise(memmap2::Advice::WillNeed)?;
            }
            Mapping::ReadOnly(map)
        } else {
            // SAFETY: the writer is the exclusive owner during sort and
            // conversion, per the shared resource policy.
            Mapping::Writable(unsafe { MmapMut::map_mut(&file)? })
        };

        Ok(())
    }

    pub fn unmap(&mut self) {
        self.mapping = Mapping::None;
    }

    /// The record region of the current map.
    pub fn body(&self) -> CoreResult<&[u8]> {
        match &self.mapping {
            Mapping::ReadOnly(map) => Ok(&map[HEADER_SIZE..]),
            Mapping::Writable(map) => Ok(&map[HEADER_SIZE..]),
            Mapping::None => Err(CoreError::Config("table is not mapped".into())),
        }
    }

    fn body_mut(&mut self) -> CoreResult<&mut [u8]> {
        match &mut self.mapping {
            Mapping::Writable(map) => Ok(&mut map[HEADER_SIZE..]),
            _ => Err(CoreError::Config("table is not mapped writable".into())),
        }
    }

    /// A typed view of the mapped records.
    pub fn records(&self) -> CoreResult<Records<'_>> {
        Ok(Records {
            data: self.body()?,
            table_type: self.header.table_type,
        })
    }

    /// Opens the append handle the builder owns exclusively.
    pub fn open_append(&self) -> CoreResult<File> {
        Ok(OpenOptions::new().append(true).open(&self.path)?)
    }

    /// Sorts an uncompressed table by endpoint, in place.
    pub fn sort_by_endpoint(&mut self) -> CoreResult<()> {
        if self.header.table_type != TableType::Uncompressed {
            return Err(CoreError::Config("cannot sort compressed tables".into()));
        }

        self.map(false)?;
        sort_rows(self.body_mut()?, 8, 8, 16);

        if let Mapping::Writable(map) = &self.mapping {
            map.flush()?;
        }
        self.unmap();
        Ok(())
    }

    /// Converts the table to the other format at `destination` and
    /// validates the result. Compressing sorts by startpoint and strips
    /// the startpoint column; decompressing materializes `(position,
    /// endpoint)` pairs and sorts them by endpoint.
    pub fn convert(&mut self, destination: &Path) -> CoreResult<TableFile> {
        let destination_type = match self.header.table_type {
            TableType::Uncompressed => TableType::Compressed,
            TableType::Compressed => TableType::Uncompressed,
        };

        info!(
            "exporting {} chains from a {} table",
            self.count()?,
            self.header.table_type
        );

        self.map(true)?;
        let records = self.records()?;

        let header = TableHeader {
            table_type: destination_type,
            ..self.header.clone()
        };

        let mut writer = File::create(destination)?;
        header.write_to(&mut writer)?;

        let mut body = Vec::with_capacity(records.count() * destination_type.record_width());
        match destination_type {
            TableType::Compressed => {
                let sorted = (0..records.count())
                    .map(|i| records.record_at(i))
                    .sorted_by_key(|record| record.startpoint);
                for record in sorted {
                    body.write_u64::<LittleEndian>(record.endpoint)?;
                }
            }
            TableType::Uncompressed => {
                for i in 0..records.count() {
                    body.write_u64::<LittleEndian>(i as u64)?;
                    body.write_u64::<LittleEndian>(records.endpoint_at(i))?;
                }
            }
        }
        writer.write_all(&body)?;
        writer.sync_all()?;
        drop(writer);

        self.unmap();

        let mut converted = TableFile::load(destination)?;
        if destination_type == TableType::Uncompressed {
            converted.sort_by_endpoint()?;
        }
        Ok(converted)
    }
}

/// A borrowed, typed view over the record region.
#[derive(Clone, Copy)]
pub struct Records<'a> {
    data: &'a [u8],
    table_type: TableType,
}

impl<'a> Records<'a> {
    pub fn count(&self) -> usize {
        self.data.len() / self.table_type.record_width()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    /// The record at `position`. For compressed tables the startpoint is
    /// the position itself.
    #[inline]
    pub fn record_at(&self, position: usize) -> TableRecord {
        match self.table_type {
            TableType::Uncompressed => TableRecord::read_le(&self.data[position * 16..]),
            TableType::Compressed => TableRecord {
                startpoint: position as u64,
                endpoint: LittleEndian::read_u64(&self.data[position * 8..position * 8 + 8]),
            },
        }
    }

    #[inline]
    pub fn endpoint_at(&self, position: usize) -> u64 {
        self.record_at(position).endpoint
    }

    /// Binary search over the endpoint byte order of a sorted uncompressed
    /// region. The fallback when no prefix index was built.
    pub fn find_endpoint(&self, endpoint: u64) -> Option<TableRecord> {
        let key = endpoint.swap_bytes();
        let mut low = 0isize;
        let mut high = self.count() as isize - 1;

        while low <= high {
            let mid = (low + (high - low) / 2) as usize;
            let record = self.record_at(mid);
            match record.endpoint_key().cmp(&key) {
                std::cmp::Ordering::Equal => return Some(record),
                std::cmp::Ordering::Less => low = mid as isize + 1,
                std::cmp::Ordering::Greater => high = mid as isize - 1,
            }
        }

        None
    }

    /// Linear endpoint scan, the only lookup a compressed table supports.
    /// Duplicate endpoints are fine; the first match wins.
    pub fn find_endpoint_linear(&self, endpoint: u64) -> Option<TableRecord> {
        let width = self.table_type.record_width();
        (0..self.count())
            .find(|&i| {
                LittleEndian::read_u64(&self.data[i * width + width - 8..i * width + width])
                    == endpoint
            })
            .map(|i| self.record_at(i))
    }
}
