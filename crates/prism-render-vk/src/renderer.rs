// SPDX-License-Identifier: CEPL-1.0
//! Live Vulkan backend: owns every GPU object and implements the chain and
//! frame backends on top of them.

use anyhow::{Context, Result};
use ash::vk;
use prism_math::Trackball;
use prism_render::{MeshData, RenderDesc, RenderSize, Renderer};
use raw_window_handle::{
    HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use tracing::{debug, info, warn};

use crate::device::{DeviceContext, InstanceContext};
use crate::error::{CallExt, VkError, VkResult};
use crate::frame::{
    AcquireOutcome, FrameBackend, FrameScheduler, FrameSyncSet, PresentOutcome,
    UniformBufferObject,
};
use crate::lifecycle::{ChainBackend, ChainInfo};
use crate::memory::{create_buffer, write_mapped, GpuBuffer, GpuImage};
use crate::pipeline::{
    create_descriptor_set_layout, create_framebuffers, create_pipeline, create_render_pass,
    PipelineState, ShaderCode,
};
use crate::shader::{compile_stage, GlslCompiler, ShaderStage};
use crate::surface::SurfaceBinding;
use crate::swapchain::{create_swap_chain, drawable_extent, SwapChainState};
use crate::targets::{depth_aspect, max_usable_samples, pick_depth_format, RenderTargets};
use crate::teardown::{chain_teardown, release_all, Destroyer, Record};
use crate::upload::{
    create_sampler, create_texture, texture_records, transition_image_layout, upload_via_staging,
    TEXTURE_FORMAT,
};

pub fn extent_of(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// Uniform buffers and descriptor sets are per image, so they only follow a
/// change in image count.
fn descriptors_stale(uniforms: usize, images: usize) -> bool {
    uniforms != images
}

fn clear_values(rgba: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

/// Every GPU object the renderer owns. Handles that have not been created
/// yet are null, and destroying a null handle is a no-op, so a partially
/// built `Gpu` can always be dropped.
struct Gpu {
    instance: InstanceContext,
    surface: SurfaceBinding,
    ctx: DeviceContext,

    vsync: bool,
    clear: [f32; 4],
    samples: vk::SampleCountFlags,
    depth_format: vk::Format,
    shaders: ShaderCode,

    command_pool: vk::CommandPool,
    sync: FrameSyncSet,

    vertex: GpuBuffer,
    index: GpuBuffer,
    index_count: u32,
    texture: GpuImage,
    sampler: vk::Sampler,

    // Sized by the chain.
    chain: SwapChainState,
    pipeline: PipelineState,
    targets: RenderTargets,
    uniforms: Vec<GpuBuffer>,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl Gpu {
    unsafe fn new(
        window: RawWindowHandle,
        display: RawDisplayHandle,
        desc: &RenderDesc,
    ) -> Result<Self> {
        let mut instance = unsafe { InstanceContext::new(display, desc.validation) }?;
        let mut surface = match unsafe { SurfaceBinding::new(&instance, display, window) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { instance.destroy() };
                return Err(e).context("create surface");
            }
        };
        let ctx = match unsafe { DeviceContext::new(&instance, &surface, desc.device_policy) } {
            Ok(c) => c,
            Err(e) => {
                unsafe {
                    surface.destroy();
                    instance.destroy();
                }
                return Err(e).context("create device");
            }
        };

        let mut gpu = Gpu {
            instance,
            surface,
            ctx,
            vsync: desc.vsync,
            clear: desc.clear_color,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_format: vk::Format::UNDEFINED,
            shaders: ShaderCode {
                vertex: Vec::new(),
                fragment: Vec::new(),
            },
            command_pool: vk::CommandPool::null(),
            sync: FrameSyncSet::default(),
            vertex: GpuBuffer::default(),
            index: GpuBuffer::default(),
            index_count: 0,
            texture: GpuImage::default(),
            sampler: vk::Sampler::null(),
            chain: SwapChainState::default(),
            pipeline: PipelineState::default(),
            targets: RenderTargets::default(),
            uniforms: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            command_buffers: Vec::new(),
        };
        // Drop releases whatever `load` managed to create.
        unsafe { gpu.load(desc) }?;
        Ok(gpu)
    }

    unsafe fn load(&mut self, desc: &RenderDesc) -> Result<()> {
        let compiler = GlslCompiler::new()?;
        self.shaders = ShaderCode {
            vertex: compile_stage(&compiler, &desc.paths, &desc.vertex_shader, ShaderStage::Vertex)?,
            fragment: compile_stage(
                &compiler,
                &desc.paths,
                &desc.fragment_shader,
                ShaderStage::Fragment,
            )?,
        };

        let instance = &self.instance.instance;
        let physical = self.ctx.physical;
        self.depth_format = pick_depth_format(|f| unsafe {
            instance.get_physical_device_format_properties(physical, f)
        })?;
        self.samples = max_usable_samples(&self.ctx.properties.limits, desc.max_samples);
        let tex_props =
            unsafe { instance.get_physical_device_format_properties(physical, TEXTURE_FORMAT) };
        info!(
            "vk: depth {:?}, samples {:?}",
            self.depth_format, self.samples
        );

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: self.ctx.graphics.family,
            ..Default::default()
        };
        self.command_pool = unsafe { self.ctx.device.create_command_pool(&pool_info, None) }
            .call("vkCreateCommandPool")?;
        self.sync = unsafe { FrameSyncSet::new(&self.ctx) }?;
        self.pipeline.descriptor_set_layout = unsafe { create_descriptor_set_layout(&self.ctx) }?;

        unsafe { self.upload_mesh(&desc.mesh) }.context("upload mesh")?;

        self.texture = unsafe {
            create_texture(
                &self.ctx,
                self.command_pool,
                &desc.texture,
                &tex_props,
                desc.mipmaps,
            )
        }
        .context("upload texture")?;
        self.sampler = unsafe { create_sampler(&self.ctx, self.texture.mip_levels) }?;
        Ok(())
    }

    unsafe fn upload_mesh(&mut self, mesh: &MeshData) -> VkResult<()> {
        self.vertex = unsafe {
            upload_via_staging(
                &self.ctx,
                self.command_pool,
                bytemuck::cast_slice(&mesh.vertices),
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )
        }?;
        self.index = unsafe {
            upload_via_staging(
                &self.ctx,
                self.command_pool,
                bytemuck::cast_slice(&mesh.indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
            )
        }?;
        self.index_count = mesh.indices.len() as u32;
        debug!(
            "mesh uploaded: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(())
    }

    fn has_chain(&self) -> bool {
        self.chain.chain != vk::SwapchainKHR::null()
    }

    fn drawable(&self, desired: vk::Extent2D) -> VkResult<Option<vk::Extent2D>> {
        let caps = unsafe { self.surface.capabilities(self.ctx.physical) }?;
        Ok(drawable_extent(&caps, desired))
    }

    unsafe fn rebuild_descriptors(&mut self, count: usize) -> VkResult<()> {
        unsafe { self.release_descriptors() };
        let d = &self.ctx.device;

        for _ in 0..count {
            let buf = unsafe {
                create_buffer(
                    &self.ctx,
                    std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
            }?;
            self.uniforms.push(buf);
        }

        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count as u32,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count as u32,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        self.descriptor_pool =
            unsafe { d.create_descriptor_pool(&pool_info, None) }.call("vkCreateDescriptorPool")?;

        let layouts = vec![self.pipeline.descriptor_set_layout; count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.descriptor_pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.descriptor_sets =
            unsafe { d.allocate_descriptor_sets(&alloc) }.call("vkAllocateDescriptorSets")?;

        let image_info = vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.texture.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        for (set, ubo) in self.descriptor_sets.iter().zip(&self.uniforms) {
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: ubo.handle,
                offset: 0,
                range: ubo.size,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &buffer_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 1,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                },
            ];
            unsafe { d.update_descriptor_sets(&writes, &[]) };
        }
        debug!("vk: {} descriptor sets / uniform buffers", count);
        Ok(())
    }

    unsafe fn release_descriptors(&mut self) {
        // Sets go with the pool.
        self.descriptor_sets.clear();
        unsafe {
            self.ctx
                .release(Record::DescriptorPool(self.descriptor_pool));
            release_all(&self.ctx, self.uniforms.drain(..).flat_map(|b| b.records()));
        }
        self.descriptor_pool = vk::DescriptorPool::null();
    }

    /// One primary command buffer per chain image, reallocated only when the
    /// count changes.
    unsafe fn ensure_command_buffers(&mut self, count: usize) -> VkResult<()> {
        if self.command_buffers.len() == count {
            return Ok(());
        }
        let d = &self.ctx.device;
        if !self.command_buffers.is_empty() {
            unsafe { d.free_command_buffers(self.command_pool, &self.command_buffers) };
            self.command_buffers.clear();
        }
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        self.command_buffers =
            unsafe { d.allocate_command_buffers(&ai) }.call("vkAllocateCommandBuffers")?;
        Ok(())
    }

    unsafe fn record_commands(&self) -> VkResult<()> {
        let d = &self.ctx.device;
        let clears = clear_values(self.clear);
        for (i, &cmd) in self.command_buffers.iter().enumerate() {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.pipeline.render_pass,
                framebuffer: self.chain.framebuffers[i],
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.chain.extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            unsafe {
                d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                    .call("vkResetCommandBuffer")?;
                d.begin_command_buffer(cmd, &begin)
                    .call("vkBeginCommandBuffer")?;
                d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
                d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex.handle], &[0]);
                d.cmd_bind_index_buffer(cmd, self.index.handle, 0, vk::IndexType::UINT32);
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout,
                    0,
                    &[self.descriptor_sets[i]],
                    &[],
                );
                d.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
                d.cmd_end_render_pass(cmd);
                d.end_command_buffer(cmd).call("vkEndCommandBuffer")?;
            }
        }
        Ok(())
    }

    unsafe fn destroy(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("vk: wait idle before teardown failed: {e}");
        }
        unsafe {
            self.destroy_chain();
            self.release_descriptors();
            release_all(&self.ctx, texture_records(self.sampler, &self.texture));
            release_all(&self.ctx, self.index.records());
            release_all(&self.ctx, self.vertex.records());
            release_all(
                &self.ctx,
                [Record::DescriptorSetLayout(self.pipeline.descriptor_set_layout)],
            );
            release_all(&self.ctx, self.sync.records());
            // Command buffers are freed with their pool.
            release_all(&self.ctx, [Record::CommandPool(self.command_pool)]);
            self.ctx.destroy();
            self.surface.destroy();
            self.instance.destroy();
        }
        debug!("vk: renderer torn down");
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe { self.destroy() };
    }
}

impl ChainBackend for Gpu {
    fn wait_idle(&mut self) -> VkResult<()> {
        self.ctx.wait_idle()
    }

    fn destroy_chain(&mut self) {
        if !self.has_chain() {
            return;
        }
        let records = chain_teardown(&self.chain, &self.pipeline, &self.targets);
        unsafe { release_all(&self.ctx, records) };
        self.chain = SwapChainState::default();
        self.targets = RenderTargets::default();
        self.pipeline = PipelineState {
            descriptor_set_layout: self.pipeline.descriptor_set_layout,
            ..Default::default()
        };
    }

    fn create_chain(&mut self, desired: vk::Extent2D) -> VkResult<ChainInfo> {
        if self.drawable(desired)?.is_none() {
            info!("vk: zero-area surface, chain creation deferred");
            return Ok(ChainInfo {
                extent: vk::Extent2D::default(),
                image_count: 0,
            });
        }

        // Each step stores its result before the next one runs, so a
        // failure leaves everything built so far for `destroy_chain`.
        self.chain = unsafe { create_swap_chain(&self.ctx, &self.surface, desired, self.vsync) }?;
        self.targets = unsafe {
            RenderTargets::new(
                &self.ctx,
                self.chain.extent,
                self.chain.format,
                self.depth_format,
                self.samples,
            )
        }?;
        unsafe {
            transition_image_layout(
                &self.ctx,
                self.command_pool,
                self.targets.depth.handle,
                depth_aspect(self.depth_format),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                1,
            )
        }?;
        self.pipeline.render_pass = unsafe {
            create_render_pass(&self.ctx, self.chain.format, self.depth_format, self.samples)
        }?;
        let (layout, pipeline) = unsafe {
            create_pipeline(
                &self.ctx,
                self.pipeline.render_pass,
                self.pipeline.descriptor_set_layout,
                self.chain.extent,
                self.samples,
                &self.shaders,
            )
        }?;
        self.pipeline.layout = layout;
        self.pipeline.pipeline = pipeline;
        unsafe {
            create_framebuffers(
                &self.ctx,
                &mut self.chain,
                &self.targets,
                self.pipeline.render_pass,
            )
        }?;
        self.chain.ensure_complete()?;

        let count = self.chain.image_count();
        if descriptors_stale(self.uniforms.len(), count) {
            unsafe { self.rebuild_descriptors(count) }?;
        }
        unsafe {
            self.ensure_command_buffers(count)?;
            self.record_commands()?;
        }
        Ok(ChainInfo {
            extent: self.chain.extent,
            image_count: count as u32,
        })
    }
}

impl FrameBackend for Gpu {
    fn wait_for_slot(&mut self, slot: usize) -> VkResult<()> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.sync.in_flight[slot]], true, u64::MAX)
        }
        .call("vkWaitForFences")
    }

    fn acquire(&mut self, slot: usize) -> VkResult<AcquireOutcome> {
        let res = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.chain.chain,
                u64::MAX,
                self.sync.image_acquired[slot],
                vk::Fence::null(),
            )
        }
        .call("vkAcquireNextImageKHR");
        match res {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Acquired { image, suboptimal }),
            Err(e) if e.is_out_of_date() => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> VkResult<()> {
        unsafe { self.ctx.device.reset_fences(&[self.sync.in_flight[slot]]) }
            .call("vkResetFences")
    }

    fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    fn write_uniforms(&mut self, image: u32, ubo: &UniformBufferObject) -> VkResult<()> {
        let buf = self
            .uniforms
            .get(image as usize)
            .ok_or(VkError::DescriptorsNotReady)?;
        unsafe { write_mapped(&self.ctx, buf.memory, std::slice::from_ref(ubo)) }
    }

    fn submit(&mut self, slot: usize, image: u32) -> VkResult<()> {
        let cmd = *self
            .command_buffers
            .get(image as usize)
            .ok_or(VkError::DescriptorsNotReady)?;
        let wait = [self.sync.image_acquired[slot]];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [self.sync.render_complete[slot]];
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics.queue,
                std::slice::from_ref(&si),
                self.sync.in_flight[slot],
            )
        }
        .call("vkQueueSubmit")
    }

    fn present(&mut self, slot: usize, image: u32) -> VkResult<PresentOutcome> {
        let wait = [self.sync.render_complete[slot]];
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            swapchain_count: 1,
            p_swapchains: &self.chain.chain,
            p_image_indices: &image,
            ..Default::default()
        };
        let res = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present.queue, &info)
        }
        .call("vkQueuePresentKHR");
        match res {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(e) if e.is_out_of_date() => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e),
        }
    }
}

pub struct VkRenderer {
    gpu: Gpu,
    scheduler: FrameScheduler,
    camera: Trackball,
}

impl VkRenderer {
    pub fn has_diagnostics(&self) -> bool {
        self.gpu.instance.has_diagnostics()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        desc: RenderDesc,
    ) -> Result<Self> {
        let window_raw = window.window_handle().context("window handle")?.as_raw();
        let display_raw = display.display_handle().context("display handle")?.as_raw();

        let mut gpu = unsafe { Gpu::new(window_raw, display_raw, &desc) }?;
        let chain = gpu
            .create_chain(extent_of(size))
            .context("create swap chain")?;

        let mut camera = Trackball::default();
        camera.set_fov_degrees(desc.fov_degrees);
        info!(
            "vk: renderer ready ({}x{}, {} images)",
            chain.extent.width, chain.extent.height, chain.image_count
        );
        Ok(Self {
            gpu,
            scheduler: FrameScheduler::new(chain),
            camera,
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.scheduler
            .resize(&mut self.gpu, extent_of(size))
            .context("swap chain rebuild")?;
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        if !self.gpu.has_chain() {
            let desired = self.scheduler.lifecycle().desired();
            if self.gpu.drawable(desired).context("surface capabilities")?.is_none() {
                return Ok(());
            }
            // The surface regained area after the last resize deferred the chain.
            self.scheduler
                .resize(&mut self.gpu, desired)
                .context("deferred swap chain rebuild")?;
            if !self.gpu.has_chain() {
                return Ok(());
            }
        }
        self.scheduler
            .draw_frame(&mut self.gpu, &self.camera)
            .context("draw frame")?;
        Ok(())
    }

    fn set_vsync(&mut self, on: bool) -> Result<()> {
        if self.gpu.vsync == on {
            return Ok(());
        }
        self.gpu.vsync = on;
        let desired = self.scheduler.lifecycle().desired();
        self.scheduler
            .resize(&mut self.gpu, desired)
            .context("swap chain rebuild after vsync change")?;
        Ok(())
    }

    fn camera_mut(&mut self) -> &mut Trackball {
        &mut self.camera
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gpu.ctx.wait_idle().context("device wait idle")?;
        Ok(())
    }
}
