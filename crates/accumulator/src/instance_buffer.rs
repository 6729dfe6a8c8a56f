//! `InstanceBuffer`: CPU staging for packed dab records plus a growable GPU
//! vertex/storage buffer, generalized from this lineage's
//! `BrushDabChunkF32` staging-then-upload idiom (`brush_execution`) down to
//! a host-resident Vec that grows on demand instead of a fixed-capacity
//! ring chunk, since spec doubling-capacity semantics replace the
//! ring-buffer backpressure this lineage used for its threaded design.

use stroke_geom::{effective_radius, Rect};
use stroke_protocol::{DabParametricGpu, DabTexturedGpu};

const INITIAL_CAPACITY_DABS: usize = 128;

pub trait PackedDab: bytemuck::Pod {
    fn from_params(x: f32, y: f32, radius: f32, hardness: f32, extra: DabExtra) -> Self;
}

/// Fields common to both packed dab kinds needed purely for bbox/packing,
/// kept separate from the GPU record layouts in `stroke-protocol`.
#[derive(Debug, Clone, Copy)]
pub struct DabExtra {
    pub color: [f32; 3],
    pub dab_opacity: f32,
    pub flow: f32,
    pub roundness: f32,
    pub angle_radians: f32,
    pub size_or_diameter: f32,
}

impl PackedDab for DabParametricGpu {
    fn from_params(x: f32, y: f32, radius: f32, hardness: f32, extra: DabExtra) -> Self {
        DabParametricGpu {
            pos_x: x,
            pos_y: y,
            radius,
            hardness,
            color_r: extra.color[0],
            color_g: extra.color[1],
            color_b: extra.color[2],
            dab_opacity: extra.dab_opacity,
            flow: extra.flow,
            roundness: extra.roundness,
            cos_theta: extra.angle_radians.cos(),
            sin_theta: extra.angle_radians.sin(),
        }
    }
}

impl PackedDab for DabTexturedGpu {
    fn from_params(x: f32, y: f32, _radius: f32, _hardness: f32, extra: DabExtra) -> Self {
        DabTexturedGpu {
            pos_x: x,
            pos_y: y,
            diameter: extra.size_or_diameter,
            roundness: extra.roundness,
            angle: extra.angle_radians,
            color_r: extra.color[0],
            color_g: extra.color[1],
            color_b: extra.color[2],
            dab_opacity: extra.dab_opacity,
            flow: extra.flow,
            source_tex_w: 0.0,
            source_tex_h: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceBufferError {
    /// The batch (on flush) exceeds the shared-memory dab limit.
    BatchTooLarge { pending: usize, limit: usize },
}

impl std::fmt::Display for InstanceBufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceBufferError::BatchTooLarge { pending, limit } => {
                write!(f, "instance buffer has {pending} pending dabs, exceeding the {limit} dab dispatch limit")
            }
        }
    }
}

impl std::error::Error for InstanceBufferError {}

pub struct FlushedBatch {
    pub count: u32,
}

/// Host staging + GPU storage buffer for one packed dab kind.
pub struct InstanceBuffer<T: PackedDab> {
    staged: Vec<T>,
    bounding_box: Rect,
    gpu_buffer: Option<wgpu::Buffer>,
    gpu_capacity_dabs: usize,
}

impl<T: PackedDab> InstanceBuffer<T> {
    pub fn new() -> Self {
        Self {
            staged: Vec::new(),
            bounding_box: Rect::EMPTY,
            gpu_buffer: None,
            gpu_capacity_dabs: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    pub fn bounding_box(&self) -> Rect {
        self.bounding_box
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Appends a dab, expanding the running bounding box by the effective
    /// radius (spec §4.6), with no margin applied here -- callers that need
    /// the dirty-rect display margin add it themselves.
    pub fn push(&mut self, x: f32, y: f32, radius: f32, hardness: f32, extra: DabExtra) {
        self.staged.push(T::from_params(x, y, radius, hardness, extra));
        let reach = effective_radius(radius, hardness);
        let dab_rect = Rect::from_center_radius(x, y, reach);
        self.bounding_box = self.bounding_box.union(&dab_rect);
    }

    pub fn clear(&mut self) {
        self.staged.clear();
        self.bounding_box = Rect::EMPTY;
    }

    /// Uploads pending dabs to the GPU buffer (growing it, doubling
    /// capacity, if needed) and resets staging. Returns `None` if there was
    /// nothing to flush.
    pub fn flush(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &'static str,
        batch_limit: usize,
    ) -> Result<Option<FlushedBatch>, InstanceBufferError> {
        if self.staged.is_empty() {
            return Ok(None);
        }
        if self.staged.len() > batch_limit {
            return Err(InstanceBufferError::BatchTooLarge {
                pending: self.staged.len(),
                limit: batch_limit,
            });
        }

        self.ensure_gpu_capacity(device, label, self.staged.len());
        queue.write_buffer(
            self.gpu_buffer.as_ref().expect("capacity just ensured"),
            0,
            bytemuck::cast_slice(&self.staged),
        );
        let count = self.staged.len() as u32;
        self.staged.clear();
        self.bounding_box = Rect::EMPTY;
        Ok(Some(FlushedBatch { count }))
    }

    pub fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu_buffer.as_ref()
    }

    fn ensure_gpu_capacity(&mut self, device: &wgpu::Device, label: &'static str, required_dabs: usize) {
        if self.gpu_buffer.is_some() && required_dabs <= self.gpu_capacity_dabs {
            return;
        }
        let new_capacity = required_dabs
            .max(INITIAL_CAPACITY_DABS)
            .next_power_of_two()
            .max(self.gpu_capacity_dabs * 2);
        self.gpu_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (new_capacity * std::mem::size_of::<T>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.gpu_capacity_dabs = new_capacity;
    }
}

impl<T: PackedDab> Default for InstanceBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extra() -> DabExtra {
        DabExtra {
            color: [1.0, 0.0, 0.0],
            dab_opacity: 1.0,
            flow: 1.0,
            roundness: 1.0,
            angle_radians: 0.0,
            size_or_diameter: 8.0,
        }
    }

    #[test]
    fn push_expands_bounding_box_by_effective_radius() {
        let mut buffer: InstanceBuffer<DabParametricGpu> = InstanceBuffer::new();
        buffer.push(10.0, 10.0, 4.0, 1.0, extra());
        let bbox = buffer.bounding_box();
        // effective_radius(4.0, 1.0) = 4.0 * 1.1 = 4.4
        assert!(bbox.min_x <= 6 && bbox.max_x >= 14);
    }

    #[test]
    fn clear_resets_staging_and_bbox() {
        let mut buffer: InstanceBuffer<DabParametricGpu> = InstanceBuffer::new();
        buffer.push(0.0, 0.0, 4.0, 1.0, extra());
        buffer.clear();
        assert_eq!(buffer.pending(), 0);
        assert!(buffer.bounding_box().is_empty());
    }

    #[test]
    fn multiple_pushes_union_the_bounding_box() {
        let mut buffer: InstanceBuffer<DabParametricGpu> = InstanceBuffer::new();
        buffer.push(0.0, 0.0, 2.0, 1.0, extra());
        buffer.push(100.0, 100.0, 2.0, 1.0, extra());
        let bbox = buffer.bounding_box();
        assert!(bbox.min_x <= 0 && bbox.max_x >= 100);
        assert!(bbox.min_y <= 0 && bbox.max_y >= 100);
    }
}
