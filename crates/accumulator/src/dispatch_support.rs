//! Shared dispatch plumbing: a dynamic-offset uniform slab sized for up to
//! 256 tiles per dispatch (spec §4.4), rebuilt in a CPU scratch buffer and
//! uploaded as a single write, mirroring this lineage's
//! `merge_uniform_buffer`/`merge_uniform_stride` pattern
//! (`renderer::renderer_init`) generalized away from one specific pass.

use stroke_protocol::limits::MAX_TILES_PER_DISPATCH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    TooManyTiles { count: usize, limit: usize },
    TooManyDabs { count: usize, limit: usize },
    DeviceLost,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::TooManyTiles { count, limit } => {
                write!(f, "dispatch needs {count} tile uniform slots, exceeding capacity {limit}")
            }
            DispatchError::TooManyDabs { count, limit } => {
                write!(f, "dispatch batch has {count} dabs, exceeding the {limit} dab shared-memory limit")
            }
            DispatchError::DeviceLost => write!(f, "device lost; dispatch suppressed"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// A uniform buffer holding up to [`MAX_TILES_PER_DISPATCH`] slots, each
/// aligned to the device's minimum dynamic uniform offset.
pub struct TileUniformSlab {
    buffer: wgpu::Buffer,
    stride: u64,
    slot_size: u64,
}

impl TileUniformSlab {
    pub fn new(device: &wgpu::Device, label: &'static str, slot_size: u64) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = slot_size.next_multiple_of(alignment);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: stride * MAX_TILES_PER_DISPATCH as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            stride,
            slot_size,
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    pub fn offset_for(&self, tile_index: usize) -> wgpu::DynamicOffset {
        (tile_index as u64 * self.stride) as wgpu::DynamicOffset
    }

    /// Writes `entries` (one per tile) into their aligned slots with a
    /// single CPU scratch build, then one queue write.
    pub fn write<T: bytemuck::Pod>(&self, queue: &wgpu::Queue, entries: &[T]) {
        debug_assert!(entries.len() <= MAX_TILES_PER_DISPATCH);
        debug_assert_eq!(std::mem::size_of::<T>() as u64, self.slot_size);
        let mut scratch = vec![0u8; self.stride as usize * entries.len()];
        for (index, entry) in entries.iter().enumerate() {
            let start = index * self.stride as usize;
            scratch[start..start + self.slot_size as usize].copy_from_slice(bytemuck::bytes_of(entry));
        }
        queue.write_buffer(&self.buffer, 0, &scratch);
    }

    pub fn binding_size(&self) -> std::num::NonZeroU64 {
        std::num::NonZeroU64::new(self.slot_size).expect("uniform slot size must be non-zero")
    }
}

pub fn check_tile_count(count: usize) -> Result<(), DispatchError> {
    if count > MAX_TILES_PER_DISPATCH {
        Err(DispatchError::TooManyTiles {
            count,
            limit: MAX_TILES_PER_DISPATCH,
        })
    } else {
        Ok(())
    }
}
