//! The five compute pipelines of spec §4.4: parametric dab, textured dab,
//! dual mask, dual blend, wet edge. Each owns its bind-group layout,
//! pipeline, a [`TileUniformSlab`], and a [`BindGroupCache`] keyed by
//! participating texture identities, grounded in this lineage's pipeline
//! construction idiom (`renderer::renderer_init::Renderer::new`:
//! bind-group-layout, pipeline-layout, shader module, pipeline, in that
//! order, with an error scope around pipeline creation).

use std::num::NonZeroU64;

use stroke_protocol::limits::MAX_DABS_PER_BATCH;
use stroke_protocol::{
    DualBlendUniforms, DualMaskUniforms, ParametricDabUniforms, TexturedDabUniforms, WetEdgeUniforms,
};

use crate::bind_group_cache::{BindGroupCache, BindGroupKey};
use crate::dispatch_support::{check_tile_count, DispatchError, TileUniformSlab};
use crate::tile_builder::DispatchTile;

fn create_pipeline_with_validation(
    device: &wgpu::Device,
    label: &'static str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
) -> wgpu::ComputePipeline {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some("main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    if let Some(error) = pollster::block_on(scope.pop()) {
        panic!("create {label} validation failed: {error}");
    }
    pipeline
}

pub struct ParametricDabPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: TileUniformSlab,
    sampler: wgpu::Sampler,
    cache: BindGroupCache,
}

impl ParametricDabPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("accumulator.parametric_dab.layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba16Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: Some(
                            NonZeroU64::new(std::mem::size_of::<ParametricDabUniforms>() as u64).unwrap(),
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 7,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("accumulator.parametric_dab.pipeline_layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("accumulator.parametric_dab.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/parametric_dab.wgsl").into()),
        });
        let pipeline = create_pipeline_with_validation(
            device,
            "accumulator.parametric_dab.pipeline",
            &pipeline_layout,
            &shader,
        );
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("accumulator.parametric_dab.pattern_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            ..Default::default()
        });
        Self {
            pipeline,
            layout,
            uniforms: TileUniformSlab::new(
                device,
                "accumulator.parametric_dab.uniforms",
                std::mem::size_of::<ParametricDabUniforms>() as u64,
            ),
            sampler,
            cache: BindGroupCache::new(),
        }
    }

    pub fn clear_bind_group_cache(&mut self) {
        self.cache.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        source_view: &wgpu::TextureView,
        dest_view: &wgpu::TextureView,
        source_identity: u64,
        dest_identity: u64,
        dab_buffer: &wgpu::Buffer,
        dab_count: u32,
        pattern_view: &wgpu::TextureView,
        pattern_identity: u64,
        noise_view: &wgpu::TextureView,
        noise_identity: u64,
        erf_lut_view: &wgpu::TextureView,
        erf_lut_identity: u64,
        tiles: &[DispatchTile],
        base_uniforms: ParametricDabUniforms,
    ) -> Result<(), DispatchError> {
        check_tile_count(tiles.len())?;
        if dab_count as usize > MAX_DABS_PER_BATCH {
            return Err(DispatchError::TooManyDabs {
                count: dab_count as usize,
                limit: MAX_DABS_PER_BATCH,
            });
        }
        if tiles.is_empty() {
            return Ok(());
        }

        let entries: Vec<ParametricDabUniforms> = tiles
            .iter()
            .map(|tile| ParametricDabUniforms {
                tile_offset: [tile.rect.min_x as u32, tile.rect.min_y as u32],
                tile_size: [tile.rect.width(), tile.rect.height()],
                ..base_uniforms
            })
            .collect();
        self.uniforms.write(queue, &entries);

        let key = BindGroupKey::new(&[
            source_identity,
            dest_identity,
            pattern_identity,
            noise_identity,
            erf_lut_identity,
        ]);
        let layout = &self.layout;
        let uniforms = &self.uniforms;
        let sampler = &self.sampler;
        let bind_group = self.cache.get_or_insert_with(key, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("accumulator.parametric_dab.bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(dest_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: uniforms.buffer(),
                            offset: 0,
                            size: Some(uniforms.binding_size()),
                        }),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: dab_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(pattern_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: wgpu::BindingResource::TextureView(noise_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: wgpu::BindingResource::TextureView(erf_lut_view),
                    },
                ],
            })
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("accumulator.parametric_dab.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        for (index, tile) in tiles.iter().enumerate() {
            pass.set_bind_group(0, bind_group, &[self.uniforms.offset_for(index)]);
            let (wx, wy) = tile.workgroups();
            pass.dispatch_workgroups(wx, wy, 1);
        }
        Ok(())
    }
}

pub struct TexturedDabPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: TileUniformSlab,
    sampler: wgpu::Sampler,
    pattern_sampler: wgpu::Sampler,
    cache: BindGroupCache,
}

impl TexturedDabPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("accumulator.textured_dab.layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba16Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: Some(
                            NonZeroU64::new(std::mem::size_of::<TexturedDabUniforms>() as u64).unwrap(),
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 7,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 8,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("accumulator.textured_dab.pipeline_layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("accumulator.textured_dab.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/textured_dab.wgsl").into()),
        });
        let pipeline = create_pipeline_with_validation(
            device,
            "accumulator.textured_dab.pipeline",
            &pipeline_layout,
            &shader,
        );
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("accumulator.textured_dab.sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });
        let pattern_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("accumulator.textured_dab.pattern_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            ..Default::default()
        });
        Self {
            pipeline,
            layout,
            uniforms: TileUniformSlab::new(
                device,
                "accumulator.textured_dab.uniforms",
                std::mem::size_of::<TexturedDabUniforms>() as u64,
            ),
            sampler,
            pattern_sampler,
            cache: BindGroupCache::new(),
        }
    }

    pub fn clear_bind_group_cache(&mut self) {
        self.cache.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        source_view: &wgpu::TextureView,
        dest_view: &wgpu::TextureView,
        source_identity: u64,
        dest_identity: u64,
        dab_buffer: &wgpu::Buffer,
        dab_count: u32,
        brush_tip_view: &wgpu::TextureView,
        brush_tip_identity: u64,
        pattern_view: &wgpu::TextureView,
        pattern_identity: u64,
        noise_view: &wgpu::TextureView,
        noise_identity: u64,
        tiles: &[DispatchTile],
        base_uniforms: TexturedDabUniforms,
    ) -> Result<(), DispatchError> {
        check_tile_count(tiles.len())?;
        if dab_count as usize > MAX_DABS_PER_BATCH {
            return Err(DispatchError::TooManyDabs {
                count: dab_count as usize,
                limit: MAX_DABS_PER_BATCH,
            });
        }
        if tiles.is_empty() {
            return Ok(());
        }

        let entries: Vec<TexturedDabUniforms> = tiles
            .iter()
            .map(|tile| TexturedDabUniforms {
                tile_offset: [tile.rect.min_x as u32, tile.rect.min_y as u32],
                tile_size: [tile.rect.width(), tile.rect.height()],
                ..base_uniforms
            })
            .collect();
        self.uniforms.write(queue, &entries);

        let key = BindGroupKey::new(&[
            source_identity,
            dest_identity,
            brush_tip_identity,
            pattern_identity,
            noise_identity,
        ]);
        let layout = &self.layout;
        let uniforms = &self.uniforms;
        let sampler = &self.sampler;
        let pattern_sampler = &self.pattern_sampler;
        let bind_group = self.cache.get_or_insert_with(key, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("accumulator.textured_dab.bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(dest_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: uniforms.buffer(),
                            offset: 0,
                            size: Some(uniforms.binding_size()),
                        }),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: dab_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::TextureView(brush_tip_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: wgpu::BindingResource::Sampler(pattern_sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: wgpu::BindingResource::TextureView(pattern_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 8,
                        resource: wgpu::BindingResource::TextureView(noise_view),
                    },
                ],
            })
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("accumulator.textured_dab.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        for (index, tile) in tiles.iter().enumerate() {
            pass.set_bind_group(0, bind_group, &[self.uniforms.offset_for(index)]);
            let (wx, wy) = tile.workgroups();
            pass.dispatch_workgroups(wx, wy, 1);
        }
        Ok(())
    }
}

pub struct DualMaskPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: TileUniformSlab,
    cache: BindGroupCache,
}

impl DualMaskPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("accumulator.dual_mask.layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::R32Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: Some(
                            NonZeroU64::new(std::mem::size_of::<DualMaskUniforms>() as u64).unwrap(),
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("accumulator.dual_mask.pipeline_layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("accumulator.dual_mask.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/dual_mask.wgsl").into()),
        });
        let pipeline =
            create_pipeline_with_validation(device, "accumulator.dual_mask.pipeline", &pipeline_layout, &shader);
        Self {
            pipeline,
            layout,
            uniforms: TileUniformSlab::new(
                device,
                "accumulator.dual_mask.uniforms",
                std::mem::size_of::<DualMaskUniforms>() as u64,
            ),
            cache: BindGroupCache::new(),
        }
    }

    pub fn clear_bind_group_cache(&mut self) {
        self.cache.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        dest_view: &wgpu::TextureView,
        source_view: &wgpu::TextureView,
        dest_identity: u64,
        source_identity: u64,
        dab_buffer: &wgpu::Buffer,
        dab_count: u32,
        tiles: &[DispatchTile],
        base_uniforms: DualMaskUniforms,
    ) -> Result<(), DispatchError> {
        check_tile_count(tiles.len())?;
        if dab_count as usize > MAX_DABS_PER_BATCH {
            return Err(DispatchError::TooManyDabs {
                count: dab_count as usize,
                limit: MAX_DABS_PER_BATCH,
            });
        }
        if tiles.is_empty() {
            return Ok(());
        }

        let entries: Vec<DualMaskUniforms> = tiles
            .iter()
            .map(|tile| DualMaskUniforms {
                tile_offset: [tile.rect.min_x as u32, tile.rect.min_y as u32],
                tile_size: [tile.rect.width(), tile.rect.height()],
                ..base_uniforms
            })
            .collect();
        self.uniforms.write(queue, &entries);

        let key = BindGroupKey::new(&[dest_identity, source_identity]);
        let layout = &self.layout;
        let uniforms = &self.uniforms;
        let bind_group = self.cache.get_or_insert_with(key, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("accumulator.dual_mask.bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(dest_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: uniforms.buffer(),
                            offset: 0,
                            size: Some(uniforms.binding_size()),
                        }),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: dab_buffer.as_entire_binding(),
                    },
                ],
            })
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("accumulator.dual_mask.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        for (index, tile) in tiles.iter().enumerate() {
            pass.set_bind_group(0, bind_group, &[self.uniforms.offset_for(index)]);
            let (wx, wy) = tile.workgroups();
            pass.dispatch_workgroups(wx, wy, 1);
        }
        Ok(())
    }
}

pub struct DualBlendPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    cache: BindGroupCache,
}

impl DualBlendPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("accumulator.dual_blend.layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba16Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: Some(
                            NonZeroU64::new(std::mem::size_of::<DualBlendUniforms>() as u64).unwrap(),
                        ),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("accumulator.dual_blend.pipeline_layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("accumulator.dual_blend.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/dual_blend.wgsl").into()),
        });
        let pipeline =
            create_pipeline_with_validation(device, "accumulator.dual_blend.pipeline", &pipeline_layout, &shader);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("accumulator.dual_blend.uniforms"),
            size: std::mem::size_of::<DualBlendUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            pipeline,
            layout,
            uniform_buffer,
            cache: BindGroupCache::new(),
        }
    }

    pub fn clear_bind_group_cache(&mut self) {
        self.cache.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        primary_view: &wgpu::TextureView,
        mask_view: &wgpu::TextureView,
        dest_view: &wgpu::TextureView,
        primary_identity: u64,
        mask_identity: u64,
        dest_identity: u64,
        uniforms: DualBlendUniforms,
    ) {
        if uniforms.dirty_size[0] == 0 || uniforms.dirty_size[1] == 0 {
            return;
        }
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let key = BindGroupKey::new(&[primary_identity, mask_identity, dest_identity]);
        let layout = &self.layout;
        let uniform_buffer = &self.uniform_buffer;
        let bind_group = self.cache.get_or_insert_with(key, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("accumulator.dual_blend.bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(primary_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(mask_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(dest_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                ],
            })
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("accumulator.dual_blend.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(
            uniforms.dirty_size[0].div_ceil(8),
            uniforms.dirty_size[1].div_ceil(8),
            1,
        );
    }
}

pub struct WetEdgePipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    cache: BindGroupCache,
}

impl WetEdgePipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("accumulator.wet_edge.layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba16Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: Some(
                            NonZeroU64::new(std::mem::size_of::<WetEdgeUniforms>() as u64).unwrap(),
                        ),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("accumulator.wet_edge.pipeline_layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("accumulator.wet_edge.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/wet_edge.wgsl").into()),
        });
        let pipeline =
            create_pipeline_with_validation(device, "accumulator.wet_edge.pipeline", &pipeline_layout, &shader);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("accumulator.wet_edge.uniforms"),
            size: std::mem::size_of::<WetEdgeUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            pipeline,
            layout,
            uniform_buffer,
            cache: BindGroupCache::new(),
        }
    }

    pub fn clear_bind_group_cache(&mut self) {
        self.cache.clear();
    }

    pub fn dispatch(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        source_view: &wgpu::TextureView,
        dest_view: &wgpu::TextureView,
        source_identity: u64,
        dest_identity: u64,
        uniforms: WetEdgeUniforms,
    ) {
        if uniforms.dirty_size[0] == 0 || uniforms.dirty_size[1] == 0 || uniforms.strength <= 0.01 {
            return;
        }
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let key = BindGroupKey::new(&[source_identity, dest_identity]);
        let layout = &self.layout;
        let uniform_buffer = &self.uniform_buffer;
        let bind_group = self.cache.get_or_insert_with(key, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("accumulator.wet_edge.bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(dest_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                ],
            })
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("accumulator.wet_edge.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(
            uniforms.dirty_size[0].div_ceil(8),
            uniforms.dirty_size[1].div_ceil(8),
            1,
        );
    }
}
