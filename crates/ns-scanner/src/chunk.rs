//! Fixed-size chunking of a byte stream.
//!
//! [`ChunkReader`] turns any [`Read`] into a lazy, finite sequence of
//! [`Chunk`]s. Every chunk except possibly the last holds exactly
//! `chunk_size` bytes; short reads from the OS are retried until the chunk is
//! full or the stream is exhausted. The reader never holds more than one
//! chunk, so memory use does not depend on file size.
//!
//! # Examples
//!
//! ```
//! use ns_scanner::ChunkReader;
//!
//! let data: &[u8] = b"abcdefg";
//! let sizes: Vec<usize> = ChunkReader::new(data, 3)
//!     .map(|chunk| chunk.map(|c| c.len()))
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(sizes, vec![3, 3, 1]);
//! ```

use std::fs::File;
use std::io::{self, Read};

use camino::Utf8Path;

/// An immutable, bounded slice of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(Box<[u8]>);

impl Chunk {
    /// Returns the chunk's bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the number of bytes in the chunk.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the chunk holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

/// Counts occurrences of `sentinel` in `bytes` by linear scan.
///
/// # Examples
///
/// ```
/// assert_eq!(ns_scanner::count_sentinel(b"a\0b\0\0", 0), 3);
/// ```
#[inline]
#[must_use]
pub fn count_sentinel(bytes: &[u8], sentinel: u8) -> u64 {
    bytes.iter().filter(|&&b| b == sentinel).count() as u64
}

/// Lazily splits a byte stream into chunks of at most `chunk_size` bytes.
///
/// The iterator is not restartable: consuming it advances the underlying
/// stream. After an I/O error it yields `None`.
#[derive(Debug)]
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl ChunkReader<File> {
    /// Opens `path` for chunked reading.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from opening the file.
    pub fn open(path: &Utf8Path, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path.as_std_path())?;
        Ok(Self::new(file, chunk_size))
    }
}

impl<R: Read> ChunkReader<R> {
    /// Wraps `reader`, yielding chunks of at most `chunk_size` bytes.
    ///
    /// A `chunk_size` of zero is treated as one byte.
    #[must_use]
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    /// Returns the configured chunk size.
    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn read_chunk(&mut self) -> io::Result<Option<Chunk>> {
        // `chunk_size` caps the buffer; it is not preallocated. `take` +
        // `read_to_end` keeps reading until the chunk is full or EOF,
        // retrying interrupted reads.
        let mut buf = Vec::new();
        (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(&mut buf)?;

        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Chunk::from(buf)))
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A reader that hands out at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    /// A reader that fails after yielding `ok_bytes`.
    struct Failing {
        ok_bytes: usize,
    }

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.ok_bytes == 0 {
                return Err(io::Error::other("device error"));
            }
            let n = self.ok_bytes.min(buf.len());
            buf[..n].fill(0);
            self.ok_bytes -= n;
            Ok(n)
        }
    }

    fn sizes<R: Read>(reader: ChunkReader<R>) -> Vec<usize> {
        reader.map(|c| c.unwrap().len()).collect()
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        let reader = ChunkReader::new(io::empty(), 4);
        assert!(sizes(reader).is_empty());
    }

    #[test]
    fn test_last_chunk_may_be_shorter() {
        let data = vec![7u8; 10];
        assert_eq!(sizes(ChunkReader::new(data.as_slice(), 4)), vec![4, 4, 2]);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_empty_chunk() {
        let data = vec![7u8; 8];
        assert_eq!(sizes(ChunkReader::new(data.as_slice(), 4)), vec![4, 4]);
    }

    #[test]
    fn test_short_reads_still_fill_chunks() {
        let data = vec![1u8; 25];
        let reader = Trickle {
            data: &data,
            step: 3,
        };
        assert_eq!(sizes(ChunkReader::new(reader, 10)), vec![10, 10, 5]);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let reader = ChunkReader::new(&b"ab"[..], 0);
        assert_eq!(reader.chunk_size(), 1);
        assert_eq!(sizes(reader), vec![1, 1]);
    }

    #[test]
    fn test_error_is_yielded_once_then_fused() {
        let mut reader = ChunkReader::new(Failing { ok_bytes: 4 }, 4);
        assert_eq!(reader.next().unwrap().unwrap().len(), 4);
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_huge_chunk_size_only_allocates_what_is_read() {
        let data = [0u8, 1, 0];
        let mut reader = ChunkReader::new(&data[..], usize::MAX);
        let chunk = reader.next().unwrap().unwrap();
        assert_eq!(chunk.as_bytes(), &data);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_chunks_preserve_content() {
        let data: Vec<u8> = (0..=255).collect();
        let joined: Vec<u8> = ChunkReader::new(data.as_slice(), 100)
            .flat_map(|c| c.unwrap().as_bytes().to_vec())
            .collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_count_sentinel() {
        assert_eq!(count_sentinel(b"", 0), 0);
        assert_eq!(count_sentinel(b"\0\0x\0", 0), 3);
        assert_eq!(count_sentinel(b"AAAB", b'A'), 3);
        assert_eq!(count_sentinel(b"no zero here", 0), 0);
    }

    #[test]
    fn test_partition_invariance() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 7) as u8).collect();
        let whole = count_sentinel(&data, 0);

        for chunk_size in [1, 3, 64, 999, 10_000, 20_000] {
            let summed: u64 = ChunkReader::new(data.as_slice(), chunk_size)
                .map(|c| count_sentinel(c.unwrap().as_bytes(), 0))
                .sum();
            assert_eq!(summed, whole, "chunk_size = {chunk_size}");
        }
    }
}
