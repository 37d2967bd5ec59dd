use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bzip2::read::MultiBzDecoder;
use tracing::{debug, info};

use crate::config::{ENTRY_PREFIX, ENTRY_SUFFIX};
use crate::error::{AppError, Result};

/// Source of per-market entries. Implementations must be safe to read from
/// several workers at once.
pub trait MarketArchive: Send + Sync {
    /// Every market id with a stored entry, in archive order.
    fn market_ids(&self) -> Vec<String>;

    /// Decompressed bytes of one market's entry.
    fn get_entry(&self, market_id: &str) -> Result<Vec<u8>>;
}

/// Location of one member's data inside the tar file.
#[derive(Debug, Clone)]
struct MemberLocation {
    path: String,
    market_id: String,
    offset: u64,
    size: u64,
}

/// Tar archive of bzip2-compressed market entries.
///
/// The archive is scanned once on [`TarArchive::open`] to index member data
/// offsets. Each [`MarketArchive::get_entry`] call then opens its own
/// read-only handle, seeks straight to the member and decompresses it, so
/// concurrent readers never share file state.
#[derive(Debug)]
pub struct TarArchive {
    path: PathBuf,
    /// Directory of the first member; market entries live under it.
    prefix: String,
    members: Vec<MemberLocation>,
    /// market_id → index into `members`
    by_market: HashMap<String, usize>,
}

impl TarArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source: std::io::Error| AppError::ArchiveOpen { path: path.clone(), source };

        let file = File::open(&path).map_err(open_err)?;
        let mut archive = tar::Archive::new(file);

        let mut prefix: Option<String> = None;
        let mut members = Vec::new();
        let mut by_market = HashMap::new();
        let mut unrecognised = 0usize;

        for entry in archive.entries_with_seek().map_err(open_err)? {
            let entry = entry.map_err(open_err)?;
            let member_path = entry.path().map_err(open_err)?.to_string_lossy().into_owned();
            if prefix.is_none() {
                prefix = Some(parent_dir(&member_path).to_string());
            }
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let Some(market_id) = market_id_from_member(&member_path) else {
                unrecognised += 1;
                continue;
            };

            let idx = members.len();
            let canonical = prefix
                .as_deref()
                .is_some_and(|p| entry_key(p, &market_id) == member_path);
            // The canonical `<prefix>/BASIC-<id>.bz2` member wins over any other copy.
            if canonical || !by_market.contains_key(&market_id) {
                by_market.insert(market_id.clone(), idx);
            }
            members.push(MemberLocation {
                path: member_path,
                market_id,
                offset: entry.raw_file_position(),
                size: entry.size(),
            });
        }

        let prefix = prefix.unwrap_or_default();
        info!(
            members = members.len(),
            markets = by_market.len(),
            unrecognised,
            "[ARCHIVE] indexed {} ({} market entries under {:?})",
            path.display(),
            by_market.len(),
            prefix,
        );

        Ok(Self { path, prefix, members, by_market })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.by_market.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_market.is_empty()
    }

    fn read_member(&self, member: &MemberLocation) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(member.offset))?;
        let mut decoder = MultiBzDecoder::new(file.take(member.size));
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|source| AppError::Decompression { key: member.path.clone(), source })?;
        debug!(
            market_id = %member.market_id,
            compressed = member.size,
            decompressed = out.len(),
            "[ARCHIVE] read {}",
            member.path,
        );
        Ok(out)
    }
}

impl MarketArchive for TarArchive {
    fn market_ids(&self) -> Vec<String> {
        self.members
            .iter()
            .enumerate()
            .filter(|(idx, m)| self.by_market.get(&m.market_id) == Some(idx))
            .map(|(_, m)| m.market_id.clone())
            .collect()
    }

    fn get_entry(&self, market_id: &str) -> Result<Vec<u8>> {
        let idx = self
            .by_market
            .get(market_id)
            .ok_or_else(|| AppError::EntryNotFound(entry_key(&self.prefix, market_id)))?;
        self.read_member(&self.members[*idx])
    }
}

/// Member path of a market's entry: `<prefix>/BASIC-<market_id>.bz2`.
pub fn entry_key(prefix: &str, market_id: &str) -> String {
    if prefix.is_empty() {
        format!("{ENTRY_PREFIX}{market_id}{ENTRY_SUFFIX}")
    } else {
        format!("{prefix}/{ENTRY_PREFIX}{market_id}{ENTRY_SUFFIX}")
    }
}

/// Recover the market id from a member path.
///
/// Accepts both `.../BASIC-1.123.bz2` and the nested `.../<event_id>/1.123.bz2`
/// layout. Returns None for anything that is not `<digits>.<digits>`.
pub fn market_id_from_member(member_path: &str) -> Option<String> {
    let file_name = member_path.rsplit('/').next()?;
    let stem = file_name.strip_suffix(ENTRY_SUFFIX)?;
    let stem = stem.strip_prefix(ENTRY_PREFIX).unwrap_or(stem);
    let (head, tail) = stem.split_once('.')?;
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if is_digits(head) && is_digits(tail) {
        Some(stem.to_string())
    } else {
        None
    }
}

fn parent_dir(member_path: &str) -> &str {
    let trimmed = member_path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[..pos],
        None => "",
    }
}
