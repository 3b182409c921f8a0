use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, ComputePipeline,
    ComputePipelineDescriptor, Device, PipelineLayoutDescriptor, ShaderModuleDescriptor,
    ShaderSource, ShaderStages,
};

use crate::gpu::context::GpuContext;
use crate::sparse::{ElementKind, SparseFormat};

pub const WORKGROUP_SIZE: u32 = 256;

/// Params uniform shared by both shaders. Must match WGSL `Params`.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpmvParams {
    pub n_rows: u32,
    pub row_width: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

pub struct SpmvPipeline {
    pub format: SparseFormat,
    pub pipeline: ComputePipeline,
    pub spmv_bind_group_layout: BindGroupLayout,
    /// Element type of each storage binding, in argument order.
    pub arg_kinds: &'static [ElementKind],
}

const CRS_ARGS: &[ElementKind] = &[
    ElementKind::F64, // values
    ElementKind::U32, // columns
    ElementKind::U32, // row_delimiters
    ElementKind::F64, // x
    ElementKind::F64, // y
];

const ELL_ARGS: &[ElementKind] = &[
    ElementKind::F64, // values
    ElementKind::U32, // columns
    ElementKind::F64, // x
    ElementKind::F64, // y
];

fn create_uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_storage_entry(binding: u32, is_read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage {
                read_only: is_read_only,
            },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Compile the shader for `format`. The device must have `SHADER_F64`.
pub fn create_spmv_pipeline(ctx: &GpuContext, format: SparseFormat) -> SpmvPipeline {
    let device = &ctx.device;

    let (label, source, arg_kinds) = match format {
        SparseFormat::Crs => ("spmv_crs.wgsl", include_str!("wgsl/spmv_crs.wgsl"), CRS_ARGS),
        SparseFormat::Ell => ("spmv_ell.wgsl", include_str!("wgsl/spmv_ell.wgsl"), ELL_ARGS),
    };

    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some(label),
        source: ShaderSource::Wgsl(source.into()),
    });

    // ------------------------------------------------------------------------
    // Bind group layout: storage args in kernel argument order (inputs RO,
    // output RW last), then the params uniform.
    // ------------------------------------------------------------------------
    let output_binding = arg_kinds.len() as u32 - 1;
    let mut entries: Vec<BindGroupLayoutEntry> = (0..output_binding)
        .map(|b| create_storage_entry(b, true))
        .collect();
    entries.push(create_storage_entry(output_binding, false));
    entries.push(create_uniform_entry(output_binding + 1));

    let spmv_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("spmv bgl0"),
        entries: &entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("spmv pipeline layout"),
        bind_group_layouts: &[&spmv_bind_group_layout],
        immediate_size: 0,
    });

    let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some("spmv pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("compute_main"),
        compilation_options: Default::default(),
        cache: None,
    });

    SpmvPipeline {
        format,
        pipeline,
        spmv_bind_group_layout,
        arg_kinds,
    }
}

/// Bind `args` at bindings `0..args.len()` and `params_buffer` right after.
pub fn create_spmv_bind_group(
    device: &Device,
    spmv_bind_group_layout: &BindGroupLayout,
    args: &[&Buffer],
    params_buffer: &Buffer,
) -> BindGroup {
    let mut entries: Vec<BindGroupEntry<'_>> = args
        .iter()
        .enumerate()
        .map(|(i, buffer)| BindGroupEntry {
            binding: i as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    entries.push(BindGroupEntry {
        binding: args.len() as u32,
        resource: params_buffer.as_entire_binding(),
    });

    device.create_bind_group(&BindGroupDescriptor {
        label: Some("spmv bind group 0"),
        layout: spmv_bind_group_layout,
        entries: &entries,
    })
}
