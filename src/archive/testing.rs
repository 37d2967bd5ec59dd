//! Test doubles and fixture builders for archive-backed tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use bzip2::write::BzEncoder;
use bzip2::Compression;

use crate::archive::reader::{entry_key, MarketArchive};
use crate::error::{AppError, Result};

/// In-memory archive holding already-decompressed entries.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    order: Vec<String>,
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, market_id: &str, lines: &[&str]) -> Self {
        self.order.push(market_id.to_string());
        self.entries.insert(market_id.to_string(), lines.join("\n").into_bytes());
        self
    }

    /// Lists `market_id` without storing bytes for it, so fetching it fails.
    pub fn with_missing(mut self, market_id: &str) -> Self {
        self.order.push(market_id.to_string());
        self
    }
}

impl MarketArchive for MemoryArchive {
    fn market_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    fn get_entry(&self, market_id: &str) -> Result<Vec<u8>> {
        self.entries
            .get(market_id)
            .cloned()
            .ok_or_else(|| AppError::EntryNotFound(entry_key("", market_id)))
    }
}

pub fn bz2(data: &[u8]) -> Vec<u8> {
    let mut enc = BzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Write a tar file named `data.tar` under `dir` with the given members.
pub fn write_tar_archive(dir: &Path, members: &[(&str, Vec<u8>)]) -> PathBuf {
    let path = dir.join("data.tar");
    let mut builder = tar::Builder::new(File::create(&path).unwrap());
    for (name, bytes) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, bytes.as_slice()).unwrap();
    }
    builder.into_inner().unwrap();
    path
}
