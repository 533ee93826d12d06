//! The striped (RAID-0) virtual block device.
//!
//! Distributes fixed-size extents round-robin across N leaf devices,
//! fanning out per-leaf I/O on a scoped thread per participating leaf and
//! rejoining before returning. `std::thread::scope` is the join barrier:
//! it cannot return until every spawned leaf worker has finished, whether
//! that worker succeeded or failed, so a failing leaf still reaches the
//! barrier instead of deadlocking the others.

use crate::device::{not_ready, BlockDevice, DeviceState};
use crate::sense::{SenseException, SenseExceptionKind};

/// Stripe unit size in bytes.
pub const EXTENT: u64 = 8192;

struct Geometry {
    /// Blocks per extent (`EXTENT / block_size`).
    f: u64,
    /// Whole extents spanned by the request.
    fragments: u64,
}

/// A RAID-0 composition of `N` leaf block devices.
pub struct StripedDevice {
    name: String,
    leaves: Vec<Box<dyn BlockDevice>>,
    state: DeviceState,
    block_size: u32,
    block_count: u64,
}

impl StripedDevice {
    pub fn new(name: impl Into<String>, leaves: Vec<Box<dyn BlockDevice>>) -> Self {
        StripedDevice {
            name: name.into(),
            leaves,
            state: DeviceState::Closed,
            block_size: 0,
            block_count: 0,
        }
    }

    fn require_open(&self) -> Result<(), SenseException> {
        if self.state == DeviceState::Open {
            Ok(())
        } else {
            Err(not_ready())
        }
    }

    fn leaf_count(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// `leaf_index`/`leaf_local_addr` implement the extent mapping: extent
    /// `i` (0-indexed within the request) lands round-robin
    /// on leaf `((A/F) + i) mod N`, at leaf-local block address
    /// `((A/F)/N)*F + (i/N)*F`.
    fn leaf_index(&self, address: u64, f: u64, i: u64) -> usize {
        (((address / f) + i) % self.leaf_count()) as usize
    }

    fn leaf_local_addr(&self, address: u64, f: u64, i: u64) -> u64 {
        let n = self.leaf_count();
        ((address / f) / n) * f + (i / n) * f
    }

    fn validate_request(&self, address: u64, buffer_len: usize) -> Result<Geometry, SenseException> {
        self.require_open()?;

        if buffer_len as u64 % self.block_size as u64 != 0 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }
        let block_len = buffer_len as u64 / self.block_size as u64;

        let out_of_range = match address.checked_add(block_len) {
            Some(end) => address > self.block_count || end > self.block_count,
            None => true,
        };
        if out_of_range {
            return Err(SenseException::new(
                SenseExceptionKind::LogicalBlockAddressOutOfRange,
            ));
        }

        // Partial-extent I/O is not supported.
        if (block_len * self.block_size as u64) % EXTENT != 0 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }

        let f = EXTENT / self.block_size as u64;
        // Non-extent-aligned host addresses are a precondition error.
        if address % f != 0 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }

        Ok(Geometry {
            f,
            fragments: block_len / f,
        })
    }

    /// Group request-local extent indices `0..fragments` by the leaf they
    /// land on, preserving ascending order within each leaf (which is also
    /// each leaf's local extent order, since extents assigned to the same
    /// leaf differ by exactly `N` in `i`).
    fn group_by_leaf(&self, address: u64, geo: &Geometry) -> Vec<Vec<u64>> {
        let mut groups = vec![Vec::new(); self.leaf_count() as usize];
        for i in 0..geo.fragments {
            groups[self.leaf_index(address, geo.f, i)].push(i);
        }
        groups
    }

    fn first_error(results: Vec<Result<(), SenseException>>) -> Result<(), SenseException> {
        for result in results {
            if let Err(e) = result {
                return Err(e.into_internal_target_failure());
            }
        }
        Ok(())
    }
}

impl BlockDevice for StripedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), SenseException> {
        if self.state == DeviceState::Open {
            return Err(not_ready());
        }
        if self.leaves.is_empty() {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }

        for (opened, leaf) in self.leaves.iter_mut().enumerate() {
            if let Err(e) = leaf.open() {
                for already in &mut self.leaves[..opened] {
                    let _ = already.close();
                }
                return Err(e);
            }
        }

        if let Err(e) = self.finish_open() {
            for leaf in self.leaves.iter_mut() {
                let _ = leaf.close();
            }
            return Err(e);
        }

        self.state = DeviceState::Open;
        log::debug!(
            "striped device {} opened: {} leaves, block_size={}, block_count={}",
            self.name,
            self.leaves.len(),
            self.block_size,
            self.block_count
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), SenseException> {
        self.require_open()?;
        self.state = DeviceState::Closed;
        // Propagate close to every leaf regardless of individual failures.
        for leaf in self.leaves.iter_mut() {
            if let Err(e) = leaf.close() {
                log::warn!("striped device {}: leaf close failed: {e}", self.name);
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state == DeviceState::Open
    }

    fn block_size(&self) -> Result<u32, SenseException> {
        self.require_open()?;
        Ok(self.block_size)
    }

    fn block_count(&self) -> Result<u64, SenseException> {
        self.require_open()?;
        Ok(self.block_count)
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), SenseException> {
        let geo = self.validate_request(address, buffer.len())?;
        if geo.fragments == 0 {
            return Ok(());
        }
        let groups = self.group_by_leaf(address, &geo);
        let mut leaf_buffers: Vec<Vec<u8>> = groups
            .iter()
            .map(|frags| vec![0u8; frags.len() * EXTENT as usize])
            .collect();

        let results = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for ((leaf, frags), leaf_buf) in self
                .leaves
                .iter()
                .zip(groups.iter())
                .zip(leaf_buffers.iter_mut())
            {
                if frags.is_empty() {
                    continue;
                }
                let local_addr = self.leaf_local_addr(address, geo.f, frags[0]);
                handles.push(scope.spawn(move || leaf.read(local_addr, leaf_buf)));
            }
            handles
                .into_iter()
                .map(|h| h.join().expect("leaf worker panicked"))
                .collect::<Vec<_>>()
        });
        Self::first_error(results)?;

        for i in 0..geo.fragments {
            let leaf = self.leaf_index(address, geo.f, i);
            let local_pos = (i / self.leaf_count()) as usize;
            let dst = i as usize * EXTENT as usize;
            let src = local_pos * EXTENT as usize;
            buffer[dst..dst + EXTENT as usize]
                .copy_from_slice(&leaf_buffers[leaf][src..src + EXTENT as usize]);
        }
        Ok(())
    }

    fn write(&mut self, address: u64, buffer: &[u8]) -> Result<(), SenseException> {
        let geo = self.validate_request(address, buffer.len())?;
        if geo.fragments == 0 {
            return Ok(());
        }
        let groups = self.group_by_leaf(address, &geo);
        let n = self.leaf_count();
        let mut leaf_buffers: Vec<Vec<u8>> = groups
            .iter()
            .map(|frags| vec![0u8; frags.len() * EXTENT as usize])
            .collect();

        // Gather: fragment i -> leaf i mod N, local offset (i/N) * EXTENT.
        for i in 0..geo.fragments {
            let leaf = self.leaf_index(address, geo.f, i);
            let local_pos = (i / n) as usize;
            let src = i as usize * EXTENT as usize;
            let dst = local_pos * EXTENT as usize;
            leaf_buffers[leaf][dst..dst + EXTENT as usize]
                .copy_from_slice(&buffer[src..src + EXTENT as usize]);
        }

        let local_addrs: Vec<u64> = groups
            .iter()
            .map(|frags| {
                if frags.is_empty() {
                    0
                } else {
                    self.leaf_local_addr(address, geo.f, frags[0])
                }
            })
            .collect();

        let results = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (((leaf_idx, leaf), frags), leaf_buf) in self
                .leaves
                .iter_mut()
                .enumerate()
                .zip(groups.iter())
                .zip(leaf_buffers.iter())
            {
                if frags.is_empty() {
                    continue;
                }
                let local_addr = local_addrs[leaf_idx];
                handles.push(scope.spawn(move || leaf.write(local_addr, leaf_buf)));
            }
            handles
                .into_iter()
                .map(|h| h.join().expect("leaf worker panicked"))
                .collect::<Vec<_>>()
        });
        Self::first_error(results)
    }
}

impl StripedDevice {
    fn finish_open(&mut self) -> Result<(), SenseException> {
        let block_size = self.leaves[0].block_size()?;
        for leaf in &self.leaves {
            if leaf.block_size()? != block_size {
                return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
            }
        }
        if EXTENT % block_size as u64 != 0 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }

        let mut min_leaf_blocks = u64::MAX;
        for leaf in &self.leaves {
            min_leaf_blocks = min_leaf_blocks.min(leaf.block_count()?);
        }

        let f = EXTENT / block_size as u64;
        let leaf_extents = (min_leaf_blocks * block_size as u64) / EXTENT;
        let per_leaf_blocks = leaf_extents * f;

        self.block_size = block_size;
        self.block_count = per_leaf_blocks * self.leaf_count();
        Ok(())
    }
}
