// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use log::{debug, info};

// ============================================================================
// Storage Traits
// ============================================================================

/// Where a sender gets its payload
pub trait BlockSource: Send {
    /// Fill `buf` with the next chunk and return its length, 0 once the data
    /// is exhausted. `first` is set for the first request of a session.
    fn read_block(&mut self, buf: &mut [u8], first: bool) -> std::io::Result<usize>;
}

/// Where a receiver puts verified payload
pub trait BlockSink: Send {
    fn write_block(&mut self, block: u8, data: &[u8]) -> std::io::Result<()>;

    /// Called once the sender signalled end of transmission, before it is acknowledged
    fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// File Source
// ============================================================================

/// Reads the payload from any byte stream, a file by default
pub struct FileSource<R = File> {
    reader: R,
}

impl FileSource<File> {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(FileSource { reader: File::open(path)? })
    }
}

impl<R: Read + Send> FileSource<R> {
    pub fn new(reader: R) -> Self {
        FileSource { reader }
    }
}

impl<R: Read + Send> BlockSource for FileSource<R> {
    fn read_block(&mut self, buf: &mut [u8], _first: bool) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

// ============================================================================
// File Sink
// ============================================================================

/// File name and size announced in a YMODEM block 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub size: Option<u64>,
}

impl FileHeader {
    /// `name NUL size [SP ...]`, the rest of the block is ignored
    pub fn parse(block: &[u8]) -> FileHeader {
        let name_end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
        let name = String::from_utf8_lossy(&block[..name_end]).into_owned();

        let size = block
            .get(name_end + 1..)
            .and_then(|rest| {
                rest.iter()
                    .skip_while(|&&b| b == b' ')
                    .take_while(|b| b.is_ascii_digit())
                    .fold(None, |acc: Option<u64>, &b| {
                        Some(acc.unwrap_or(0).saturating_mul(10).saturating_add(u64::from(b - b'0')))
                    })
            });

        FileHeader { name, size }
    }
}

/// Writes received blocks to a file.
///
/// A block 0 arriving as the very first block is a YMODEM header rather than
/// data; its announced size is used to cut the padding off the file when the
/// transfer finishes.
pub struct FileSink {
    file: File,
    blocks_seen: u32,
    written: u64,
    header: Option<FileHeader>,
}

impl FileSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(FileSink {
            file: File::create(path)?,
            blocks_seen: 0,
            written: 0,
            header: None,
        })
    }

    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }
}

impl BlockSink for FileSink {
    fn write_block(&mut self, block: u8, data: &[u8]) -> std::io::Result<()> {
        let first = self.blocks_seen == 0;
        self.blocks_seen += 1;

        if first && block == 0 {
            let header = FileHeader::parse(data);
            info!("File header: name {:?}, size {:?}", header.name, header.size);
            self.header = Some(header);
            return Ok(());
        }

        self.file.write_all(data)?;
        self.written += data.len() as u64;
        debug!("Wrote block {} ({} bytes)", block, data.len());
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        if let Some(size) = self.header.as_ref().and_then(|h| h.size) {
            if size < self.written {
                debug!("Truncating {} bytes of padding", self.written - size);
                self.file.set_len(size)?;
                self.written = size;
            }
        }
        self.file.flush()?;
        self.file.sync_all()
    }
}

// ============================================================================
// In-memory Storage for Testing
// ============================================================================

/// Hands out fixed chunks and records the `first` flag of every request
#[cfg(test)]
pub struct MemorySource {
    chunks: std::collections::VecDeque<Vec<u8>>,
    requests: std::sync::Arc<std::sync::Mutex<Vec<bool>>>,
    fail: bool,
}

#[cfg(test)]
impl MemorySource {
    /// Split `data` into chunks of at most `chunk` bytes
    pub fn new(data: &[u8], chunk: usize) -> Self {
        MemorySource {
            chunks: data.chunks(chunk).map(|c| c.to_vec()).collect(),
            requests: Default::default(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        MemorySource { chunks: Default::default(), requests: Default::default(), fail: true }
    }

    pub fn requests(&self) -> std::sync::Arc<std::sync::Mutex<Vec<bool>>> {
        self.requests.clone()
    }
}

#[cfg(test)]
impl BlockSource for MemorySource {
    fn read_block(&mut self, buf: &mut [u8], first: bool) -> std::io::Result<usize> {
        self.requests.lock().unwrap().push(first);
        if self.fail {
            return Err(std::io::Error::other("source unavailable"));
        }
        match self.chunks.pop_front() {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }
}

/// Records every block it is handed
#[cfg(test)]
pub struct MemorySink {
    blocks: std::sync::Arc<std::sync::Mutex<Vec<(u8, Vec<u8>)>>>,
    fail_at: Option<usize>,
    finished: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        MemorySink { blocks: Default::default(), fail_at: None, finished: Default::default() }
    }

    /// Fail the write of the `index`th block
    pub fn failing_at(index: usize) -> Self {
        MemorySink { fail_at: Some(index), ..MemorySink::new() }
    }

    pub fn blocks(&self) -> std::sync::Arc<std::sync::Mutex<Vec<(u8, Vec<u8>)>>> {
        self.blocks.clone()
    }

    pub fn finished(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.finished.clone()
    }
}

#[cfg(test)]
impl BlockSink for MemorySink {
    fn write_block(&mut self, block: u8, data: &[u8]) -> std::io::Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        if self.fail_at == Some(blocks.len()) {
            return Err(std::io::Error::other("disk full"));
        }
        blocks.push((block, data.to_vec()));
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        self.finished.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
