use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    ptr::NonNull,
};

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use memmap2::MmapMut;

use crate::{Result, ShmErr};

pub(crate) const HEADER_LEN: usize = 64;
const MAGIC: u64 = u64::from_le_bytes(*b"CLSTRSHM");

/// What a region holds, stamped in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegionKind {
    Status = 1,
    State = 2,
    Command = 3,
    Profiling = 4,
    Debug = 5,
}

impl RegionKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::State => "state",
            Self::Command => "cmd",
            Self::Profiling => "profiling",
            Self::Debug => "debug",
        }
    }
}

/// Path of a region: `{dir}/{namespace}_{kind}` or `{dir}/{namespace}_{kind}_{slot}`.
pub fn region_path(dir: &Path, namespace: &str, kind: RegionKind, slot: Option<usize>) -> PathBuf {
    let name = match slot {
        Some(slot) => format!("{namespace}_{}_{slot}", kind.suffix()),
        None => format!("{namespace}_{}", kind.suffix()),
    };
    dir.join(name)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RegionHeader {
    magic: u64,
    kind: u32,
    _pad: u32,
    fingerprint: u64,
    payload_len: u64,
    _reserved: [u64; 4],
}

const _: () = assert!(size_of::<RegionHeader>() == HEADER_LEN);

/// A file-backed mapping shared between the client and the workers.
///
/// The creating side owns the file and unlinks it on drop, attached sides only
/// unmap. The payload starts 64 bytes into the page-aligned mapping, so it is
/// aligned for any atomic or float the blocks lay on top of it.
pub struct SharedRegion {
    path: PathBuf,
    kind: RegionKind,
    owner: bool,
    payload_len: usize,
    base: NonNull<u8>,
    _mmap: MmapMut,
}

// SAFETY: `base` points into `_mmap`, which lives as long as the region and is
// never remapped. Cross-thread access to the payload goes through atomics or
// through the `&mut` accessors of the buffers.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Creates (or recreates) a zeroed region of `payload_len` bytes.
    ///
    /// A file left behind by a previous session under the same name is truncated.
    pub fn create(path: PathBuf, kind: RegionKind, fingerprint: u64, payload_len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ShmErr::io(&path, "create", e))?;
        file.set_len((HEADER_LEN + payload_len) as u64)
            .map_err(|e| ShmErr::io(&path, "size", e))?;

        // SAFETY: the file was just created and sized by us. Other processes
        // map it too, which is the point, and synchronize through the atomics
        // of the status block.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| ShmErr::io(&path, "map", e))?;

        let header = RegionHeader {
            magic: MAGIC,
            kind: kind as u32,
            _pad: 0,
            fingerprint,
            payload_len: payload_len as u64,
            _reserved: [0; 4],
        };
        mmap[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&header));

        debug!(kind:? = kind, len = payload_len; "created region {}", path.display());
        Ok(Self::from_mmap(path, kind, true, payload_len, mmap))
    }

    /// Attaches to a region created by the other side.
    ///
    /// # Errors
    /// `Missing` if the file does not exist, `GeometryMismatch` if it was created
    /// for another geometry, `Truncated`, `BadMagic` or `KindMismatch` if it is
    /// not the region it is expected to be.
    pub fn attach(path: PathBuf, kind: RegionKind, fingerprint: u64, payload_len: usize) -> Result<Self> {
        Self::open(path, kind, fingerprint, Some(payload_len))
    }

    /// Attaches without knowing the payload length up front.
    pub(crate) fn open(
        path: PathBuf,
        kind: RegionKind,
        fingerprint: u64,
        payload_len: Option<usize>,
    ) -> Result<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ShmErr::Missing(path)),
            Err(e) => return Err(ShmErr::io(&path, "open", e)),
        };

        let len = file
            .metadata()
            .map_err(|e| ShmErr::io(&path, "stat", e))?
            .len() as usize;
        if len < HEADER_LEN {
            return Err(ShmErr::Truncated {
                path,
                len,
                expected: HEADER_LEN + payload_len.unwrap_or(0),
            });
        }

        // SAFETY: see `create`, the creator keeps the file at its full length
        // until it unlinks it.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| ShmErr::io(&path, "map", e))?;
        let header: RegionHeader = bytemuck::pod_read_unaligned(&mmap[..HEADER_LEN]);

        if header.magic != MAGIC {
            return Err(ShmErr::BadMagic(path));
        }
        if header.kind != kind as u32 {
            return Err(ShmErr::KindMismatch {
                path,
                expected: kind,
                found: header.kind,
            });
        }
        if header.fingerprint != fingerprint {
            return Err(ShmErr::GeometryMismatch {
                path,
                expected: fingerprint,
                found: header.fingerprint,
            });
        }

        let stored = header.payload_len as usize;
        let expected = payload_len.unwrap_or(stored);
        if stored != expected || len < HEADER_LEN + expected {
            return Err(ShmErr::Truncated {
                path,
                len,
                expected: HEADER_LEN + expected,
            });
        }

        debug!(kind:? = kind, len = expected; "attached to region {}", path.display());
        Ok(Self::from_mmap(path, kind, false, expected, mmap))
    }

    fn from_mmap(path: PathBuf, kind: RegionKind, owner: bool, payload_len: usize, mut mmap: MmapMut) -> Self {
        // SAFETY: the mapping is at least HEADER_LEN bytes long.
        let base = unsafe { NonNull::new_unchecked(mmap.as_mut_ptr().add(HEADER_LEN)) };
        Self {
            path,
            kind,
            owner,
            payload_len,
            base,
            _mmap: mmap,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Reinterprets `count` values at `offset` bytes into the payload.
    ///
    /// # Safety
    /// `T` must be valid for any bit pattern and interior-mutable or only
    /// mutated through `slice_mut` under exclusive access. The range must be
    /// in bounds and aligned for `T`.
    pub(crate) unsafe fn slice<T>(&self, offset: usize, count: usize) -> &[T] {
        debug_assert!(offset + count * size_of::<T>() <= self.payload_len);
        debug_assert_eq!(offset % align_of::<T>(), 0);
        // SAFETY: upheld by the caller.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset).cast::<T>(), count) }
    }

    /// Mutable counterpart of `slice`.
    ///
    /// # Safety
    /// Same as `slice`. Other processes may write the same bytes, the caller
    /// relies on the trigger protocol for exclusive access.
    pub(crate) unsafe fn slice_mut<T>(&mut self, offset: usize, count: usize) -> &mut [T] {
        debug_assert!(offset + count * size_of::<T>() <= self.payload_len);
        debug_assert_eq!(offset % align_of::<T>(), 0);
        // SAFETY: upheld by the caller.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr().add(offset).cast::<T>(), count) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("unlinked region {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not unlink region {}: {e}", self.path.display()),
        }
    }
}
