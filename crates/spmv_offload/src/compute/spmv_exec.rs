use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{BufferUsages, CommandEncoder, ComputePassDescriptor};

use crate::compute::spmv::{
    SpmvParams, SpmvPipeline, WORKGROUP_SIZE, create_spmv_bind_group, create_spmv_pipeline,
};
use crate::error::{Result, SpmvError};
use crate::gpu::buffer::GpuBuffer;
use crate::gpu::context::GpuContext;
use crate::sparse::{LaunchShape, SparseFormat};

/// SpmvExecutor (native wgpu version)
///
/// Owns the compiled pipeline for one format. Buffers are not owned here:
/// the offload session passes them per dispatch in argument order
///   CRS: values, columns, row_delimiters, x, y
///   ELL: values, columns, x, y
pub struct SpmvExecutor {
    spmv_pipeline: SpmvPipeline,
}

impl SpmvExecutor {
    pub fn create(ctx: &GpuContext, format: SparseFormat) -> Self {
        Self {
            spmv_pipeline: create_spmv_pipeline(ctx, format),
        }
    }

    pub fn format(&self) -> SparseFormat {
        self.spmv_pipeline.format
    }

    /// Workgroups for `n_rows`, checked against the device's per-dimension limit.
    pub fn workgroups_for(ctx: &GpuContext, n_rows: usize) -> Result<u32> {
        let groups = n_rows.div_ceil(WORKGROUP_SIZE as usize);
        let limit = ctx.device.limits().max_compute_workgroups_per_dimension;
        u32::try_from(groups)
            .ok()
            .filter(|g| *g <= limit)
            .ok_or_else(|| {
                SpmvError::DispatchFailure(format!(
                    "{n_rows} rows need {groups} workgroups, device allows {limit}"
                ))
            })
    }

    /// Check `args` against the bind group layout before touching wgpu, so a
    /// mismatch surfaces as `DispatchFailure` rather than a validation panic.
    fn check_args(&self, args: &[GpuBuffer], shape: LaunchShape) -> Result<()> {
        let kinds = self.spmv_pipeline.arg_kinds;
        if args.len() != kinds.len() {
            return Err(SpmvError::DispatchFailure(format!(
                "{} kernel takes {} buffers, got {}",
                self.format(),
                kinds.len(),
                args.len()
            )));
        }
        for (i, (arg, kind)) in args.iter().zip(kinds).enumerate() {
            if arg.kind != *kind {
                return Err(SpmvError::DispatchFailure(format!(
                    "argument {i} ('{}') is {:?}, kernel expects {:?}",
                    arg.label, arg.kind, kind
                )));
            }
        }
        let out_len = args[args.len() - 1].len;
        if out_len != shape.n_rows {
            return Err(SpmvError::DispatchFailure(format!(
                "output buffer holds {out_len} rows, launch has {}",
                shape.n_rows
            )));
        }
        Ok(())
    }

    /// Encode the SpMV compute pass: `args[last] = A * args[last - 1]`.
    pub fn encode_spmv(
        &self,
        ctx: &GpuContext,
        encoder: &mut CommandEncoder,
        args: &[GpuBuffer],
        shape: LaunchShape,
    ) -> Result<()> {
        self.check_args(args, shape)?;
        let groups_x = Self::workgroups_for(ctx, shape.n_rows)?;

        let to_u32 = |v: usize, what: &str| {
            u32::try_from(v).map_err(|_| {
                SpmvError::DispatchFailure(format!("{what} {v} does not fit the u32 params"))
            })
        };
        let params = SpmvParams {
            n_rows: to_u32(shape.n_rows, "n_rows")?,
            row_width: to_u32(shape.row_width, "row_width")?,
            _pad0: 0,
            _pad1: 0,
        };
        let params_buffer = ctx.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("spmv params"),
            contents: bytemuck::bytes_of(&params),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let buffers: Vec<&wgpu::Buffer> = args.iter().map(|a| &a.buffer).collect();
        let bind_group = create_spmv_bind_group(
            &ctx.device,
            &self.spmv_pipeline.spmv_bind_group_layout,
            &buffers,
            &params_buffer,
        );

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("spmv pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.spmv_pipeline.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups_x, 1, 1);

        Ok(())
    }
}
