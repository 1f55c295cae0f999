//! Object size queries that avoid materializing content.
//!
//! For packed non-delta objects only the entry's varint header is read from
//! the pack file. For loose objects only the first compressed window is
//! inflated, enough to parse the `"<type> <size>\0"` header. Packed delta
//! objects fall back to full odb materialization, since their true size is
//! only known after delta application.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Pack entry object types. 1-4 store the decompressed size directly in the
/// entry header; 6 and 7 are deltas.
const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

/// Batch-efficient object size lookup, scoped to one repository.
///
/// The pack index and pack file handles are built on first use and released
/// by [`close`](ObjectSizer::close). Closing is idempotent; using the sizer
/// again after closing rebuilds the state lazily.
pub struct ObjectSizer {
    gitdir: PathBuf,
    index: Option<HashMap<git2::Oid, (PathBuf, u64)>>,
    packs: HashMap<PathBuf, File>,
}

impl ObjectSizer {
    /// Create a sizer for the repository at `gitdir`. No I/O happens until
    /// the first [`size`](ObjectSizer::size) call.
    pub fn new(gitdir: impl Into<PathBuf>) -> Self {
        Self {
            gitdir: gitdir.into(),
            index: None,
            packs: HashMap::new(),
        }
    }

    /// The decompressed size of the object `oid`.
    ///
    /// `repo` is consulted only for the packed-delta fallback.
    pub fn size(&mut self, repo: &git2::Repository, oid: git2::Oid) -> Result<u64> {
        if self.index.is_none() {
            self.index = Some(self.build_pack_index()?);
        }

        let packed = self
            .index
            .as_ref()
            .and_then(|idx| idx.get(&oid))
            .map(|(path, offset)| (path.clone(), *offset));

        if let Some((pack_path, offset)) = packed {
            let (obj_type, size) = self.read_pack_header(&pack_path, offset)?;
            return match obj_type {
                // commit, tree, blob, tag: the entry header has the answer.
                1..=4 => Ok(size),
                // Delta entry headers carry the delta's size, not the
                // object's; materialize through the odb instead.
                OBJ_OFS_DELTA | OBJ_REF_DELTA => {
                    let odb = repo.odb()?;
                    let len = odb.read(oid)?.len() as u64;
                    Ok(len)
                }
                other => Err(Error::invalid_state(format!(
                    "pack entry for {} has unknown type {}",
                    oid, other
                ))),
            };
        }

        let hex = oid.to_string();
        let loose = self
            .gitdir
            .join("objects")
            .join(&hex[..2])
            .join(&hex[2..]);
        if loose.exists() {
            return read_loose_header(&loose);
        }

        // Not in our packs or loose dir (alternates, or a pack newer than
        // the index): let libgit2 resolve it.
        let odb = repo.odb()?;
        let result = match odb.read(oid) {
            Ok(obj) => Ok(obj.len() as u64),
            Err(_) => Err(Error::not_found(format!("object {}", hex))),
        };
        result
    }

    /// Release pack file handles and drop the index.
    pub fn close(&mut self) {
        self.packs.clear();
        self.index = None;
    }

    fn build_pack_index(&self) -> Result<HashMap<git2::Oid, (PathBuf, u64)>> {
        let mut index = HashMap::new();
        let pack_dir = self.gitdir.join("objects").join("pack");
        let entries = match std::fs::read_dir(&pack_dir) {
            Ok(e) => e,
            Err(_) => return Ok(index), // no packs yet
        };

        for entry in entries.flatten() {
            let idx_path = entry.path();
            if idx_path.extension().and_then(|e| e.to_str()) != Some("idx") {
                continue;
            }
            let pack_path = idx_path.with_extension("pack");
            let data = std::fs::read(&idx_path).map_err(|e| Error::io(&idx_path, e))?;
            parse_pack_idx(&data, &pack_path, &mut index)?;
        }
        Ok(index)
    }

    fn read_pack_header(&mut self, pack_path: &Path, offset: u64) -> Result<(u8, u64)> {
        use std::collections::hash_map::Entry;

        let f = match self.packs.entry(pack_path.to_path_buf()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                let f = File::open(pack_path).map_err(|e| Error::io(pack_path, e))?;
                v.insert(f)
            }
        };

        f.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(pack_path, e))?;

        let mut byte = [0u8; 1];
        f.read_exact(&mut byte).map_err(|e| Error::io(pack_path, e))?;
        let obj_type = (byte[0] >> 4) & 0x07;
        let mut size = (byte[0] & 0x0F) as u64;
        let mut shift = 4u32;
        while byte[0] & 0x80 != 0 {
            f.read_exact(&mut byte).map_err(|e| Error::io(pack_path, e))?;
            size |= ((byte[0] & 0x7F) as u64) << shift;
            shift += 7;
        }
        Ok((obj_type, size))
    }
}

impl Drop for ObjectSizer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ObjectSizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectSizer")
            .field("gitdir", &self.gitdir)
            .field("indexed", &self.index.as_ref().map(|i| i.len()))
            .field("open_packs", &self.packs.len())
            .finish()
    }
}

/// Parse a pack `.idx` file (v2, with v1 fallback) into `(pack, offset)`
/// entries.
fn parse_pack_idx(
    data: &[u8],
    pack_path: &Path,
    out: &mut HashMap<git2::Oid, (PathBuf, u64)>,
) -> Result<()> {
    const V2_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];

    let bad = || Error::invalid_state(format!("malformed pack index for {}", pack_path.display()));

    let u32_at = |pos: usize| -> Result<u32> {
        let b = data.get(pos..pos + 4).ok_or_else(bad)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    };

    if data.len() >= 8 && data[..4] == V2_MAGIC {
        if u32_at(4)? != 2 {
            return Err(bad());
        }
        let fanout_base = 8;
        let count = u32_at(fanout_base + 255 * 4)? as usize;
        let names_base = fanout_base + 256 * 4;
        let offsets_base = names_base + count * 20 + count * 4; // names + crc32s
        let large_base = offsets_base + count * 4;

        for i in 0..count {
            let sha = data.get(names_base + i * 20..names_base + (i + 1) * 20).ok_or_else(bad)?;
            let oid = git2::Oid::from_bytes(sha).map_err(|_| bad())?;
            let small = u32_at(offsets_base + i * 4)?;
            let offset = if small & 0x8000_0000 != 0 {
                let j = (small & 0x7FFF_FFFF) as usize;
                let b = data.get(large_base + j * 8..large_base + (j + 1) * 8).ok_or_else(bad)?;
                u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            } else {
                small as u64
            };
            out.insert(oid, (pack_path.to_path_buf(), offset));
        }
        return Ok(());
    }

    // v1: 256-entry fanout, then (offset, sha) pairs.
    let count = u32_at(255 * 4)? as usize;
    let entries_base = 256 * 4;
    for i in 0..count {
        let pos = entries_base + i * 24;
        let offset = u32_at(pos)? as u64;
        let sha = data.get(pos + 4..pos + 24).ok_or_else(bad)?;
        let oid = git2::Oid::from_bytes(sha).map_err(|_| bad())?;
        out.insert(oid, (pack_path.to_path_buf(), offset));
    }
    Ok(())
}

/// Inflate the first window of a loose object and parse its
/// `"<type> <size>\0"` header.
fn read_loose_header(path: &Path) -> Result<u64> {
    let mut f = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut compressed = [0u8; 64];
    let mut filled = 0;
    while filled < compressed.len() {
        match f.read(&mut compressed[filled..]).map_err(|e| Error::io(path, e))? {
            0 => break,
            n => filled += n,
        }
    }

    let mut inflater = flate2::Decompress::new(true);
    let mut header = [0u8; 256];
    // A truncated stream is expected: the header fits in the first window.
    let _ = inflater.decompress(
        &compressed[..filled],
        &mut header,
        flate2::FlushDecompress::None,
    );
    let produced = inflater.total_out() as usize;

    let nul = header[..produced]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::invalid_state(format!("no header in {}", path.display())))?;
    let text = std::str::from_utf8(&header[..nul])
        .map_err(|_| Error::invalid_state(format!("bad header in {}", path.display())))?;
    let size = text
        .split_once(' ')
        .and_then(|(_, s)| s.parse::<u64>().ok())
        .ok_or_else(|| Error::invalid_state(format!("bad header in {}", path.display())))?;
    Ok(size)
}
