//! Slab arena for node blobs.
//!
//! Nodes are allocated out of one contiguous slab and identified by refs:
//! 8-byte-aligned byte offsets into the slab. Ref 0 is reserved as the
//! null ref, so the slab's first 8 bytes are never handed out. Growing
//! the slab never invalidates refs (they are offsets, not addresses);
//! only re-attaching a new buffer does, which bumps the baseline version
//! that accessors use to detect staleness.

use crate::header::{is_ref, NodeHeader, HEADER_SIZE};
use std::cell::RefCell;
use std::rc::Rc;
use strata_common::{ArenaConfig, Result, StrataError};
use tracing::debug;

/// Arena-local node identifier: an 8-byte-aligned byte offset.
/// Ref 0 means "null / empty subtree".
pub type Ref = u64;

struct Slab {
    data: Vec<u8>,
    /// Bump-allocation watermark.
    used: usize,
    /// Freed blocks available for reuse: (ref, total bytes incl. header).
    free_list: Vec<(Ref, usize)>,
    /// Version bumped on every buffer re-attach.
    baseline: u64,
    config: ArenaConfig,
}

/// Shared handle to a slab arena.
///
/// The handle is cheap to clone; all columns of one storage share a
/// single arena. Interior mutability is used because the core is a
/// single-threaded mutator (see the concurrency notes in the design
/// docs) and node graphs are threaded by ref, not by borrow.
#[derive(Clone)]
pub struct Arena {
    inner: Rc<RefCell<Slab>>,
}

impl Arena {
    /// Creates an arena with default configuration.
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates an arena with the given configuration.
    pub fn with_config(config: ArenaConfig) -> Self {
        let initial = config.initial_capacity.max(64);
        let mut data = Vec::with_capacity(initial);
        // Reserve the first 8 bytes so no node ever gets ref 0.
        data.extend_from_slice(&[0u8; 8]);
        Self {
            inner: Rc::new(RefCell::new(Slab {
                data,
                used: 8,
                free_list: Vec::new(),
                baseline: 0,
                config,
            })),
        }
    }

    /// Current baseline version. Accessors that cached structural
    /// information at an older baseline must refresh before next use.
    pub fn baseline(&self) -> u64 {
        self.inner.borrow().baseline
    }

    /// Replaces the slab with a serialized buffer (e.g. the output of the
    /// slice writer) and bumps the baseline.
    pub fn attach_buffer(&self, buf: Vec<u8>) -> Result<()> {
        if buf.len() < 8 || buf.len() % 8 != 0 {
            return Err(StrataError::invariant(
                "attached buffer must be a non-empty multiple of 8 bytes",
            ));
        }
        let mut slab = self.inner.borrow_mut();
        slab.used = buf.len();
        slab.data = buf;
        slab.free_list.clear();
        slab.baseline += 1;
        debug!(baseline = slab.baseline, bytes = slab.used, "arena buffer attached");
        Ok(())
    }

    /// Allocates a node blob with the given header flags, element width
    /// and payload capacity in bytes. The header is written with size 0.
    pub fn alloc(&self, flags: u8, width: u8, capacity_bytes: usize) -> Result<Ref> {
        let cap_words = capacity_bytes.div_ceil(8);
        if cap_words as u64 > NodeHeader::MAX_FIELD as u64 {
            return Err(StrataError::AllocFailed {
                requested: capacity_bytes,
            });
        }
        let total = HEADER_SIZE + cap_words * 8;

        let mut slab = self.inner.borrow_mut();
        let r = slab.acquire(total)?;
        let header = NodeHeader::new(flags, width, cap_words as u32);
        let start = r as usize;
        slab.data[start..start + HEADER_SIZE].copy_from_slice(&header.to_bytes());
        // Zero the payload so freshly allocated ref slots read as null.
        slab.data[start + HEADER_SIZE..start + total].fill(0);
        Ok(r)
    }

    /// Frees a single node blob without following refs.
    pub fn free(&self, r: Ref) {
        let mut slab = self.inner.borrow_mut();
        let header = slab.header_at(r);
        let total = HEADER_SIZE + header.capacity_bytes();
        slab.free_list.push((r, total));
    }

    /// Frees a node and, if its slots are refs, recursively frees every
    /// child whose slot value is an even integer. Odd slot values are
    /// tagged integers and must not be followed.
    pub fn destroy_deep(&self, r: Ref) {
        if r == 0 {
            return;
        }
        let header = self.header(r);
        if header.has_refs() || header.is_inner() {
            let slots = header.size as usize;
            for i in 0..slots {
                let v = self.read_u64(r, i);
                if v != 0 && is_ref(v) {
                    self.destroy_deep(v);
                }
            }
        }
        self.free(r);
    }

    /// Reads the node header at a ref.
    pub fn header(&self, r: Ref) -> NodeHeader {
        self.inner.borrow().header_at(r)
    }

    /// Validates a ref (alignment, bounds) and returns its header.
    /// Used where structural corruption must surface as an error.
    pub fn checked_header(&self, r: Ref) -> Result<NodeHeader> {
        let slab = self.inner.borrow();
        if r == 0 || r % 8 != 0 {
            return Err(StrataError::InvalidRef {
                ref_value: r,
                reason: "null or misaligned".to_string(),
            });
        }
        let start = r as usize;
        if start + HEADER_SIZE > slab.used {
            return Err(StrataError::InvalidRef {
                ref_value: r,
                reason: "out of slab bounds".to_string(),
            });
        }
        let header = slab.header_at(r);
        if start + HEADER_SIZE + header.capacity_bytes() > slab.used {
            return Err(StrataError::NodeCorrupted {
                ref_value: r,
                reason: "capacity exceeds slab".to_string(),
            });
        }
        Ok(header)
    }

    /// Element / slot count of the node at `r`.
    pub fn node_size(&self, r: Ref) -> usize {
        self.header(r).size as usize
    }

    /// Updates the size field of the node header at `r`.
    pub fn set_node_size(&self, r: Ref, size: usize) {
        debug_assert!(size as u64 <= NodeHeader::MAX_FIELD as u64);
        let mut slab = self.inner.borrow_mut();
        let start = r as usize;
        let bytes = (size as u32).to_le_bytes();
        slab.data[start + 5..start + 8].copy_from_slice(&bytes[..3]);
    }

    /// Reads the u64 slot at index `slot` of the node payload.
    pub fn read_u64(&self, r: Ref, slot: usize) -> u64 {
        let slab = self.inner.borrow();
        let off = r as usize + HEADER_SIZE + slot * 8;
        u64::from_le_bytes(slab.data[off..off + 8].try_into().unwrap())
    }

    /// Writes the u64 slot at index `slot` of the node payload.
    pub fn write_u64(&self, r: Ref, slot: usize, value: u64) {
        let mut slab = self.inner.borrow_mut();
        let off = r as usize + HEADER_SIZE + slot * 8;
        slab.data[off..off + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Copies `len` payload bytes starting at `offset` out of the node.
    pub fn read_bytes(&self, r: Ref, offset: usize, len: usize) -> Vec<u8> {
        let slab = self.inner.borrow();
        let off = r as usize + HEADER_SIZE + offset;
        slab.data[off..off + len].to_vec()
    }

    /// Writes payload bytes starting at `offset` into the node.
    pub fn write_bytes(&self, r: Ref, offset: usize, bytes: &[u8]) {
        let mut slab = self.inner.borrow_mut();
        let off = r as usize + HEADER_SIZE + offset;
        slab.data[off..off + bytes.len()].copy_from_slice(bytes);
    }

    /// Moves payload bytes within a node (memmove semantics). Used by
    /// leaves to open or close a gap on insert/erase.
    pub fn move_bytes(&self, r: Ref, src: usize, dst: usize, len: usize) {
        if len == 0 || src == dst {
            return;
        }
        let mut slab = self.inner.borrow_mut();
        let base = r as usize + HEADER_SIZE;
        slab.data.copy_within(base + src..base + src + len, base + dst);
    }

    /// Runs `f` over the full node payload (header excluded).
    pub fn with_payload<R>(&self, r: Ref, f: impl FnOnce(&[u8]) -> R) -> R {
        let slab = self.inner.borrow();
        let header = slab.header_at(r);
        let start = r as usize + HEADER_SIZE;
        f(&slab.data[start..start + header.capacity_bytes()])
    }

    /// Runs `f` over the raw node blob including its header. Used by the
    /// slice writer to emit nodes verbatim.
    pub fn with_node_blob<R>(&self, r: Ref, f: impl FnOnce(&[u8]) -> R) -> R {
        let slab = self.inner.borrow();
        let header = slab.header_at(r);
        let start = r as usize;
        f(&slab.data[start..start + HEADER_SIZE + header.capacity_bytes()])
    }

    /// Total bytes currently handed out (high-water mark).
    pub fn used_bytes(&self) -> usize {
        self.inner.borrow().used
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Slab {
    fn header_at(&self, r: Ref) -> NodeHeader {
        debug_assert!(r != 0 && r % 8 == 0, "invalid ref {r:#x}");
        let start = r as usize;
        NodeHeader::from_bytes(&self.data[start..start + HEADER_SIZE])
    }

    /// Finds or creates a block of `total` bytes; returns its ref.
    fn acquire(&mut self, total: usize) -> Result<Ref> {
        debug_assert!(total % 8 == 0);

        // First fit from the free list. Oversized blocks are used whole;
        // their true capacity is recorded in the node header they get.
        if let Some(pos) = self
            .free_list
            .iter()
            .position(|&(_, cap)| cap >= total)
        {
            let (r, cap) = self.free_list.swap_remove(pos);
            if cap > total {
                // Return the tail to the free list if it can hold a node.
                let tail = cap - total;
                if tail >= HEADER_SIZE + 8 {
                    self.free_list.push((r + total as u64, tail));
                }
            }
            return Ok(r);
        }

        if self.used + total > self.data.len() {
            self.grow(total)?;
        }
        let r = self.used as Ref;
        self.used += total;
        Ok(r)
    }

    fn grow(&mut self, at_least: usize) -> Result<()> {
        let needed = self.used + at_least;
        let mut target = self.data.len().max(64);
        while target < needed {
            target = target * self.config.growth_numerator / 2;
        }
        if self.config.max_capacity != 0 && target > self.config.max_capacity {
            if needed > self.config.max_capacity {
                return Err(StrataError::AllocFailed {
                    requested: at_least,
                });
            }
            target = self.config.max_capacity;
        }
        debug!(from = self.data.len(), to = target, "arena slab grow");
        self.data.resize(target, 0);
        Ok(())
    }
}
