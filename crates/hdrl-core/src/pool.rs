//! Growable bump allocator backed by heap memory or memory-mapped temp files.
//!
//! Blocks are carved sequentially out of large pools and are only returned
//! to the system when the allocator is dropped. [`PoolAllocator::free`] only
//! consumes the handle.
//!
//! Pools whose creation would keep the running total below the malloc
//! threshold live on the heap; larger ones are backed by an anonymous temp
//! file in the working directory (or the platform temp directory as a
//! fallback) so bulk image data can be paged out by the OS. Setting
//! `HDRL_POOL_NO_MMAP` forces heap pools.
//!
//! The allocator is not synchronized. Allocate from one thread, or guard the
//! allocator externally.

use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use memmap2::{Mmap, MmapMut};
use ndarray::{ArrayView2, ArrayViewMut2};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::consts::{DEFAULT_POOL_SIZE, POOL_BLOCK_ALIGN, POOL_NO_MMAP_ENV};
use crate::error::{HdrlError, Result};

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Whether `HDRL_POOL_NO_MMAP` asks for heap-only pools.
pub fn heap_forced_by_env() -> bool {
    std::env::var(POOL_NO_MMAP_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolBacking {
    Heap,
    Mapped,
}

enum Mapping {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

enum Storage {
    Heap(Vec<u64>),
    Mapped {
        // None only after a failed protection change lost the mapping
        map: Option<Mapping>,
        file: File,
    },
}

struct Pool {
    storage: Storage,
    size: usize,
    free_offset: usize,
}

impl Pool {
    fn heap(size: usize) -> Self {
        Self {
            storage: Storage::Heap(vec![0u64; size.div_ceil(8)]),
            size,
            free_offset: 0,
        }
    }

    fn mapped(size: usize) -> Result<Self> {
        let file = preallocated_tempfile(size)?;
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| HdrlError::FileIo(format!("cannot map {size} byte pool: {e}")))?;
        Ok(Self {
            storage: Storage::Mapped {
                map: Some(Mapping::Writable(map)),
                file,
            },
            size,
            free_offset: 0,
        })
    }

    fn backing(&self) -> PoolBacking {
        match self.storage {
            Storage::Heap(_) => PoolBacking::Heap,
            Storage::Mapped { .. } => PoolBacking::Mapped,
        }
    }

    fn spare(&self) -> usize {
        self.size - self.free_offset
    }

    fn bump(&mut self, size: usize) -> usize {
        let offset = self.free_offset;
        self.free_offset += size;
        offset
    }

    fn bytes(&self) -> Result<&[u8]> {
        let bytes: &[u8] = match &self.storage {
            Storage::Heap(words) => bytemuck::cast_slice(words),
            Storage::Mapped {
                map: Some(Mapping::Writable(m)),
                ..
            } => &m[..],
            Storage::Mapped {
                map: Some(Mapping::ReadOnly(m)),
                ..
            } => &m[..],
            Storage::Mapped { map: None, .. } => {
                return Err(HdrlError::FileIo("pool mapping was lost".into()))
            }
        };
        Ok(&bytes[..self.size])
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        let size = self.size;
        let bytes: &mut [u8] = match &mut self.storage {
            Storage::Heap(words) => bytemuck::cast_slice_mut(words),
            Storage::Mapped {
                map: Some(Mapping::Writable(m)),
                ..
            } => &mut m[..],
            Storage::Mapped {
                map: Some(Mapping::ReadOnly(_)),
                ..
            } => {
                return Err(HdrlError::IllegalInput(
                    "pool memory is read-only".into(),
                ))
            }
            Storage::Mapped { map: None, .. } => {
                return Err(HdrlError::FileIo("pool mapping was lost".into()))
            }
        };
        Ok(&mut bytes[..size])
    }

    fn set_readonly(&mut self, readonly: bool) -> Result<()> {
        let Storage::Mapped { map, .. } = &mut self.storage else {
            return Ok(());
        };
        let next = match map.take() {
            Some(Mapping::Writable(m)) if readonly => m.make_read_only().map(Mapping::ReadOnly),
            Some(Mapping::ReadOnly(m)) if !readonly => m.make_mut().map(Mapping::Writable),
            Some(unchanged) => Ok(unchanged),
            None => return Err(HdrlError::FileIo("pool mapping was lost".into())),
        };
        match next {
            Ok(m) => {
                *map = Some(m);
                Ok(())
            }
            Err(e) => Err(HdrlError::FileIo(format!(
                "cannot change pool protection: {e}"
            ))),
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Storage::Mapped { map, file } = &mut self.storage {
            // Truncate before unmapping so dirty pages are dropped, not flushed.
            if let Err(e) = file.set_len(0) {
                warn!(error = %e, "failed to truncate pool backing file");
            }
            map.take();
        }
    }
}

/// Anonymous temp file of `size` bytes, tried in the working directory first
/// and in `TMPDIR` second.
fn preallocated_tempfile(size: usize) -> Result<File> {
    let sized = |file: File| -> std::io::Result<File> {
        file.set_len(size as u64)?;
        Ok(file)
    };
    match tempfile::tempfile_in(".").and_then(sized) {
        Ok(file) => Ok(file),
        Err(cwd_err) => {
            warn!(error = %cwd_err, "cannot back pool in working directory, trying temp dir");
            tempfile::tempfile().and_then(sized).map_err(|tmp_err| {
                HdrlError::FileIo(format!(
                    "cannot create {size} byte pool file (cwd: {cwd_err}; temp dir: {tmp_err})"
                ))
            })
        }
    }
}

/// Handle to a block handed out by a [`PoolAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolBlock {
    allocator: u64,
    pool: usize,
    offset: usize,
    len: usize,
}

impl PoolBlock {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Arena of heap or memory-mapped pools, see the module docs.
pub struct PoolAllocator {
    id: u64,
    pools: Vec<Pool>,
    freelist: Vec<usize>,
    pool_size: usize,
    total_allocated: usize,
    malloc_threshold: usize,
    readonly: bool,
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("pools", &self.pools.len())
            .field("freelist", &self.freelist)
            .field("pool_size", &self.pool_size)
            .field("total_allocated", &self.total_allocated)
            .field("malloc_threshold", &self.malloc_threshold)
            .field("readonly", &self.readonly)
            .finish()
    }
}

impl PoolAllocator {
    pub fn new() -> Self {
        Self::with_pool_size(DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            pools: Vec::new(),
            freelist: Vec::new(),
            pool_size: pool_size.max(POOL_BLOCK_ALIGN),
            total_allocated: 0,
            malloc_threshold: 0,
            readonly: false,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        let mut alloc = Self::with_pool_size(config.pool_size);
        alloc.malloc_threshold = config.malloc_threshold;
        alloc
    }

    /// Set the byte total below which new pools are heap-backed. Returns the
    /// previous threshold. Existing pools keep their backing.
    pub fn set_malloc_threshold(&mut self, bytes: usize) -> usize {
        std::mem::replace(&mut self.malloc_threshold, bytes)
    }

    pub fn malloc_threshold(&self) -> usize {
        self.malloc_threshold
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Bytes handed out so far, including alignment padding.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn freelist_len(&self) -> usize {
        self.freelist.len()
    }

    pub fn pool_backing(&self, pool: usize) -> Option<PoolBacking> {
        self.pools.get(pool).map(Pool::backing)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Bump-allocate `size` bytes.
    ///
    /// Takes the first pool on the freelist with enough room. On a miss the
    /// freelist is emptied and a new pool of `max(size, pool_size)` bytes is
    /// created; it goes back on the freelist if at least half a default pool
    /// remains free after this allocation.
    pub fn allocate(&mut self, size: usize) -> Result<PoolBlock> {
        if size == 0 {
            return Err(HdrlError::IllegalInput("cannot allocate 0 bytes".into()));
        }
        let need = size
            .checked_next_multiple_of(POOL_BLOCK_ALIGN)
            .ok_or_else(|| HdrlError::IllegalInput(format!("allocation of {size} bytes overflows")))?;

        let hit = self
            .freelist
            .iter()
            .copied()
            .find(|&i| self.pools[i].spare() >= need);

        let pool = match hit {
            Some(i) => i,
            None => {
                self.freelist.clear();
                let pool_bytes = need.max(self.pool_size);
                let pool = if self.total_allocated + need < self.malloc_threshold
                    || heap_forced_by_env()
                {
                    Pool::heap(pool_bytes)
                } else {
                    Pool::mapped(pool_bytes)?
                };
                debug!(
                    bytes = pool_bytes,
                    backing = ?pool.backing(),
                    pools = self.pools.len() + 1,
                    "created memory pool"
                );
                self.pools.push(pool);
                let idx = self.pools.len() - 1;
                if pool_bytes - need >= self.pool_size / 2 {
                    self.freelist.push(idx);
                }
                idx
            }
        };

        let offset = self.pools[pool].bump(need);
        self.total_allocated += need;
        Ok(PoolBlock {
            allocator: self.id,
            pool,
            offset,
            len: size,
        })
    }

    /// Give a block back. Arena memory is only reclaimed when the allocator
    /// is dropped, so this just consumes the handle.
    pub fn free(&mut self, block: PoolBlock) {
        let _ = block;
    }

    /// Toggle write protection of all mapped pools. Heap pools are guarded by
    /// [`PoolAllocator::block_mut`] refusing access instead.
    ///
    /// The flag only changes when every pool switched. A pool whose
    /// protection change fails loses its mapping: its blocks then report
    /// `FileIo` until the allocator is dropped.
    pub fn set_readonly(&mut self, readonly: bool) -> Result<()> {
        let mut first_err = None;
        for pool in &mut self.pools {
            if let Err(e) = pool.set_readonly(readonly) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                self.readonly = readonly;
                Ok(())
            }
        }
    }

    fn locate(&self, block: &PoolBlock) -> Result<()> {
        if block.allocator != self.id || block.pool >= self.pools.len() {
            return Err(HdrlError::AccessOutOfRange {
                what: "pool block",
                index: block.pool,
                lo: 0,
                hi: self.pools.len().saturating_sub(1),
            });
        }
        Ok(())
    }

    pub fn block(&self, block: &PoolBlock) -> Result<&[u8]> {
        self.locate(block)?;
        let bytes = self.pools[block.pool].bytes()?;
        Ok(&bytes[block.offset..block.offset + block.len])
    }

    pub fn block_mut(&mut self, block: &PoolBlock) -> Result<&mut [u8]> {
        self.locate(block)?;
        if self.readonly {
            return Err(HdrlError::IllegalInput("pool memory is read-only".into()));
        }
        let bytes = self.pools[block.pool].bytes_mut()?;
        Ok(&mut bytes[block.offset..block.offset + block.len])
    }

    pub fn block_as<T: Pod>(&self, block: &PoolBlock) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.block(block)?)
            .map_err(|e| HdrlError::IncompatibleInput(format!("pool block cast: {e}")))
    }

    pub fn block_as_mut<T: Pod>(&mut self, block: &PoolBlock) -> Result<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.block_mut(block)?)
            .map_err(|e| HdrlError::IncompatibleInput(format!("pool block cast: {e}")))
    }

    /// Allocate storage for an `ny` x `nx` plane of `f64`.
    pub fn allocate_plane(&mut self, ny: usize, nx: usize) -> Result<PoolBlock> {
        let bytes = ny
            .checked_mul(nx)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f64>()))
            .ok_or_else(|| HdrlError::IllegalInput(format!("plane {ny}x{nx} too large")))?;
        self.allocate(bytes)
    }

    pub fn plane(&self, block: &PoolBlock, ny: usize, nx: usize) -> Result<ArrayView2<'_, f64>> {
        ArrayView2::from_shape((ny, nx), self.block_as::<f64>(block)?)
            .map_err(|e| HdrlError::IncompatibleInput(format!("pool plane shape: {e}")))
    }

    pub fn plane_mut(
        &mut self,
        block: &PoolBlock,
        ny: usize,
        nx: usize,
    ) -> Result<ArrayViewMut2<'_, f64>> {
        ArrayViewMut2::from_shape((ny, nx), self.block_as_mut::<f64>(block)?)
            .map_err(|e| HdrlError::IncompatibleInput(format!("pool plane shape: {e}")))
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        if !self.pools.is_empty() {
            debug!(
                pools = self.pools.len(),
                bytes = self.total_allocated,
                "releasing memory pools"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_aligned_and_disjoint() {
        let mut alloc = PoolAllocator::with_pool_size(1024);
        alloc.set_malloc_threshold(usize::MAX);
        let a = alloc.allocate(3).unwrap();
        let b = alloc.allocate(8).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 8);
        assert_eq!(alloc.total_allocated(), 16);
    }

    #[test]
    fn foreign_block_is_rejected() {
        let mut a = PoolAllocator::with_pool_size(64);
        a.set_malloc_threshold(usize::MAX);
        let b = PoolAllocator::with_pool_size(64);
        let block = a.allocate(8).unwrap();
        assert!(matches!(
            b.block(&block),
            Err(HdrlError::AccessOutOfRange { .. })
        ));
    }

    #[test]
    fn override_values() {
        for v in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(is_truthy(v), "{v:?} should force heap pools");
        }
        for v in ["", "0", "false", "no", "off", "maybe"] {
            assert!(!is_truthy(v), "{v:?} should not force heap pools");
        }
    }

    #[test]
    fn mapped_pool_round_trip_and_protection() {
        let mut pool = Pool::mapped(4096).unwrap();
        assert_eq!(pool.backing(), PoolBacking::Mapped);
        pool.bytes_mut().unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);

        pool.set_readonly(true).unwrap();
        assert!(matches!(pool.bytes_mut(), Err(HdrlError::IllegalInput(_))));
        assert_eq!(&pool.bytes().unwrap()[..4], &[1, 2, 3, 4]);

        pool.set_readonly(false).unwrap();
        pool.bytes_mut().unwrap()[0] = 9;
        assert_eq!(pool.bytes().unwrap()[0], 9);
    }

    #[test]
    fn mapped_pool_file_truncated_on_drop() {
        let pool = Pool::mapped(8192).unwrap();
        let Storage::Mapped { file, .. } = &pool.storage else {
            panic!("expected a mapped pool");
        };
        let file = file.try_clone().unwrap();
        assert_eq!(file.metadata().unwrap().len(), 8192);
        drop(pool);
        assert_eq!(file.metadata().unwrap().len(), 0);
    }

    #[test]
    fn pools_above_threshold_are_mapped() {
        if heap_forced_by_env() {
            return;
        }
        let mut alloc = PoolAllocator::with_pool_size(4096);
        alloc.set_malloc_threshold(0);
        let block = alloc.allocate(64).unwrap();
        assert_eq!(alloc.pool_backing(0), Some(PoolBacking::Mapped));

        alloc.set_readonly(true).unwrap();
        assert!(alloc.block_mut(&block).is_err());
        alloc.set_readonly(false).unwrap();
        alloc.block_mut(&block).unwrap().fill(3);
        assert!(alloc.block(&block).unwrap().iter().all(|&b| b == 3));
    }

    #[test]
    fn failed_protection_change_keeps_flag() {
        let mut alloc = PoolAllocator::with_pool_size(4096);
        alloc.pools.push(Pool::mapped(4096).unwrap());
        if let Storage::Mapped { map, .. } = &mut alloc.pools[0].storage {
            *map = None;
        }
        assert!(matches!(alloc.set_readonly(true), Err(HdrlError::FileIo(_))));
        assert!(!alloc.is_readonly());
    }
}
