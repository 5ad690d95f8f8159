//! Purpose: Inspect partially downloaded files kept next to a block bitmap.
//! Exports: `CacheSidecar`, `CacheCompleteness`, `cache_completeness`, `CACHE_SUFFIX`.
//! Role: Backs the cache probe; the sidecar is `<path>.cache`.
//! Invariants: Layout is `[content][bitmap u32 LE words, LSB first][content_size u64 LE][block_size u32 LE]`.
//! Invariants: Bitmap word count is exactly `ceil(ceil(content_size / block_size) / 32)`.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::core::error::{Error, ErrorKind};

pub const CACHE_SUFFIX: &str = ".cache";
const TRAILER_LEN: u64 = 12;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheCompleteness {
    pub percent: f32,
    pub bytes_in_cache: u64,
}

/// Block bitmap describing which parts of the content are present.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheSidecar {
    content_size: u64,
    block_size: u32,
    bitmap: Vec<u32>,
}

impl CacheSidecar {
    pub fn new(content_size: u64, block_size: u32) -> Result<Self, Error> {
        if block_size == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("block size must be non-zero"));
        }
        let blocks = block_count(content_size, block_size);
        Ok(Self {
            content_size,
            block_size,
            bitmap: vec![0; word_count(blocks)],
        })
    }

    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        block_count(self.content_size, self.block_size)
    }

    pub fn mark_present(&mut self, block: u64) -> Result<(), Error> {
        if block >= self.block_count() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("block {block} outside content")));
        }
        self.bitmap[(block / 32) as usize] |= 1 << (block % 32);
        Ok(())
    }

    pub fn is_present(&self, block: u64) -> bool {
        if block >= self.block_count() {
            return false;
        }
        self.bitmap[(block / 32) as usize] & (1 << (block % 32)) != 0
    }

    pub fn completeness(&self) -> CacheCompleteness {
        let blocks = self.block_count();
        if blocks == 0 {
            return CacheCompleteness {
                percent: 100.0,
                bytes_in_cache: 0,
            };
        }
        let mut present = 0u64;
        let mut bytes = 0u64;
        for block in 0..blocks {
            if !self.is_present(block) {
                continue;
            }
            present += 1;
            let start = block * u64::from(self.block_size);
            bytes += (self.content_size - start).min(u64::from(self.block_size));
        }
        CacheCompleteness {
            percent: (present as f64 * 100.0 / blocks as f64) as f32,
            bytes_in_cache: bytes,
        }
    }

    /// Writes a full sidecar file; absent blocks are zero-filled.
    pub fn write_to<W: Write>(&self, content: &[u8], out: &mut W) -> Result<(), Error> {
        if content.len() as u64 != self.content_size {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "content is {} bytes, sidecar expects {}",
                content.len(),
                self.content_size
            )));
        }
        let block_size = self.block_size as usize;
        for (block, chunk) in content.chunks(block_size).enumerate() {
            if self.is_present(block as u64) {
                out.write_all(chunk).map_err(write_error)?;
            } else {
                out.write_all(&vec![0u8; chunk.len()]).map_err(write_error)?;
            }
        }
        for word in &self.bitmap {
            out.write_all(&word.to_le_bytes()).map_err(write_error)?;
        }
        out.write_all(&self.content_size.to_le_bytes())
            .map_err(write_error)?;
        out.write_all(&self.block_size.to_le_bytes())
            .map_err(write_error)?;
        Ok(())
    }

    pub fn read_from(file: &mut File) -> Result<Self, Error> {
        let len = file
            .metadata()
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to stat cache file")
                    .with_source(err)
            })?
            .len();
        if len < TRAILER_LEN {
            return Err(corrupt(format!("cache file too short ({len} bytes)")));
        }
        let mut trailer = [0u8; TRAILER_LEN as usize];
        read_at(file, len - TRAILER_LEN, &mut trailer)?;
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&trailer[..8]);
        let mut block_bytes = [0u8; 4];
        block_bytes.copy_from_slice(&trailer[8..]);
        let content_size = u64::from_le_bytes(size_bytes);
        let block_size = u32::from_le_bytes(block_bytes);
        if block_size == 0 {
            return Err(corrupt("cache block size is zero".to_string()));
        }

        let words = word_count(block_count(content_size, block_size));
        let expected = content_size
            .checked_add(words as u64 * 4)
            .and_then(|value| value.checked_add(TRAILER_LEN));
        if expected != Some(len) {
            return Err(corrupt(format!(
                "cache file is {len} bytes, trailer describes {}",
                expected.map_or_else(|| "an overflowing size".to_string(), |v| v.to_string())
            )));
        }

        let mut raw = vec![0u8; words * 4];
        read_at(file, content_size, &mut raw)?;
        let bitmap = raw
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self {
            content_size,
            block_size,
            bitmap,
        })
    }
}

/// Reads the trailer and bitmap of an open cache file.
pub fn cache_completeness(file: &mut File) -> Result<CacheCompleteness, Error> {
    Ok(CacheSidecar::read_from(file)?.completeness())
}

fn block_count(content_size: u64, block_size: u32) -> u64 {
    content_size.div_ceil(u64::from(block_size))
}

fn word_count(blocks: u64) -> usize {
    blocks.div_ceil(32) as usize
}

fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(buf))
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read cache file")
                .with_source(err)
        })
}

fn corrupt(message: String) -> Error {
    Error::new(ErrorKind::Corrupt).with_message(message)
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write cache file")
        .with_source(err)
}
