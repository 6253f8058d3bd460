// =============================================================================
// RENDERER - Owns every GPU resource and performs the per-frame GPU work
// =============================================================================
//
// RESOURCE LIFETIMES:
// ┌──────────────────────────────────────────────────────────────────┐
// │  VulkanDevice (Arc, destroyed last)                              │
// │    ├── Scene: mesh buffers, texture, descriptor layout, SPIR-V   │
// │    ├── FrameSync per frame in flight                             │
// │    └── SwapchainResources (rebuilt on resize / staleness)        │
// │          swapchain, MSAA color, depth, capture image,            │
// │          render pass, pipeline, framebuffers, UBOs,              │
// │          descriptor sets, command buffers                        │
// └──────────────────────────────────────────────────────────────────┘
//
// IMPORTANT: Field order matters for Drop! Fields are dropped top to bottom,
// so dependents are listed before what they depend on.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::buffer::Buffer;
use crate::backend::commands::CommandPool;
use crate::backend::descriptors::{DescriptorPool, DescriptorSetLayout, SetBinding};
use crate::backend::image::{find_depth_format, Image, ImageDesc};
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use crate::backend::shader::read_spirv;
use crate::backend::sync::{create_frame_syncs, FrameSync};
use crate::backend::texture::Texture;
use crate::backend::{AcquireOutcome, PresentOutcome, Swapchain, VulkanDevice};
use crate::capture::readback::{channel_order, copy_to_host_image, read_host_image};
use crate::capture::{CaptureProgress, FrameCapture};
use crate::config::Config;
use crate::mesh::Mesh;
use crate::uniform::UniformBufferObject;
use crate::window::AppWindow;

/// Settings that shape the swapchain-derived resources.
#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub capture: bool,
}

/// Everything that survives a swapchain rebuild.
pub struct Scene {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
    pub texture: Texture,
    pub descriptor_set_layout: DescriptorSetLayout,
    pub vertex_code: Vec<u32>,
    pub fragment_code: Vec<u32>,
}

impl Scene {
    pub fn load(device: &Arc<VulkanDevice>, commands: &CommandPool, config: &Config) -> Result<Self> {
        let assets = &config.assets;

        let vertex_code = read_spirv(&assets.vertex_shader)?;
        let fragment_code = read_spirv(&assets.fragment_shader)?;

        let mesh = Mesh::load_obj(&assets.model)?;
        let vertex_buffer = Buffer::device_local(
            device.clone(),
            commands,
            device.graphics_queue,
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
        )?;
        let index_buffer = Buffer::device_local(
            device.clone(),
            commands,
            device.graphics_queue,
            "index buffer",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
        )?;

        let texture = Texture::from_file(device.clone(), commands, &assets.texture)?;
        let descriptor_set_layout = DescriptorSetLayout::new(device.clone())?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            texture,
            descriptor_set_layout,
            vertex_code,
            fragment_code,
        })
    }
}

/// Everything derived from the swapchain. Rebuilt as a unit.
pub struct SwapchainResources {
    // Freeing the pool frees the recorded command buffers
    _command_pool: CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,
    descriptors: DescriptorPool,
    uniform_buffers: Vec<Buffer>,
    framebuffers: Framebuffers,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    /// Host-readable copy target, absent when capture is disabled.
    pub capture_image: Option<Image>,
    _depth: Image,
    _color: Image,
    pub swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl SwapchainResources {
    pub fn new(
        device: Arc<VulkanDevice>,
        scene: &Scene,
        settings: FrameSettings,
        old_swapchain: vk::SwapchainKHR,
        framebuffer_size: &mut dyn FnMut() -> (u32, u32),
    ) -> Result<Self> {
        let swapchain = Swapchain::new(device.clone(), settings.vsync, old_swapchain, framebuffer_size)?;
        let extent = swapchain.extent;
        let format = swapchain.format;
        let samples = device.msaa_samples;

        // Multisampled color target, resolved into the swapchain image
        let mut color_desc = ImageDesc::new(
            "msaa color",
            extent,
            format,
            vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        color_desc.samples = samples;
        color_desc.view_aspect = Some(vk::ImageAspectFlags::COLOR);
        let color = Image::new(device.clone(), color_desc)?;

        let depth_format = find_depth_format(&device)?;
        let mut depth_desc = ImageDesc::new(
            "depth",
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        depth_desc.samples = samples;
        depth_desc.view_aspect = Some(vk::ImageAspectFlags::DEPTH);
        let depth = Image::new(device.clone(), depth_desc)?;

        let capture_image = if settings.capture {
            let mut desc =
                ImageDesc::new("capture", extent, format, vk::ImageUsageFlags::TRANSFER_DST);
            desc.tiling = vk::ImageTiling::LINEAR;
            desc.location = MemoryLocation::GpuToCpu;
            Some(Image::new(device.clone(), desc)?)
        } else {
            None
        };

        let render_pass = RenderPass::new(device.clone(), format, depth_format, samples)?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &render_pass,
            scene.descriptor_set_layout.layout,
            extent,
            &scene.vertex_code,
            &scene.fragment_code,
        )?;
        let framebuffers = Framebuffers::new(
            device.clone(),
            &render_pass,
            &swapchain.image_views,
            color.view(),
            depth.view(),
            extent,
        )?;

        let ubo_size = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;
        let uniform_buffers = (0..swapchain.image_count())
            .map(|_| {
                Buffer::new(
                    device.clone(),
                    "uniform buffer",
                    ubo_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let bindings: Vec<SetBinding> = uniform_buffers
            .iter()
            .map(|ubo| SetBinding {
                uniform_buffer: ubo.buffer,
                uniform_size: ubo_size,
                image_view: scene.texture.image.view(),
                sampler: scene.texture.sampler.sampler,
            })
            .collect();
        let descriptors =
            DescriptorPool::new(device.clone(), &scene.descriptor_set_layout, &bindings)?;

        let command_pool = CommandPool::new(device.clone(), device.queue_families.graphics)?;
        let command_buffers = command_pool.allocate(swapchain.image_count())?;

        let resources = Self {
            _command_pool: command_pool,
            command_buffers,
            descriptors,
            uniform_buffers,
            framebuffers,
            pipeline,
            render_pass,
            capture_image,
            _depth: depth,
            _color: color,
            swapchain,
            device,
        };
        resources.record_commands(scene, settings.clear_color)?;

        Ok(resources)
    }

    /// Record one draw per swapchain image. Buffers are reused every frame.
    fn record_commands(&self, scene: &Scene, clear_color: [f32; 4]) -> Result<()> {
        let device = &self.device.device;
        let extent = self.swapchain.extent;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
            vk::ClearValue::default(),
        ];

        for (i, &cmd) in self.command_buffers.iter().enumerate() {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass.render_pass)
                .framebuffer(self.framebuffers.framebuffers[i])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            unsafe {
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .context("Failed to begin command buffer")?;

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.pipeline,
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[scene.vertex_buffer.buffer], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    scene.index_buffer.buffer,
                    0,
                    vk::IndexType::UINT32,
                );
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout,
                    0,
                    &[self.descriptors.sets[i]],
                    &[],
                );
                device.cmd_draw_indexed(cmd, scene.index_count, 1, 0, 0, 0);
                device.cmd_end_render_pass(cmd);

                device
                    .end_command_buffer(cmd)
                    .context("Failed to end command buffer")?;
            }
        }

        Ok(())
    }

    /// Replace every swapchain-derived resource. The old set is destroyed
    /// after the new swapchain has been created from it.
    pub fn rebuild(
        &mut self,
        scene: &Scene,
        settings: FrameSettings,
        framebuffer_size: &mut dyn FnMut() -> (u32, u32),
    ) -> Result<()> {
        self.device.wait_idle()?;

        let rebuilt = Self::new(
            self.device.clone(),
            scene,
            settings,
            self.swapchain.swapchain,
            framebuffer_size,
        )
        .context("Failed to recreate swapchain")?;

        *self = rebuilt;
        log::info!(
            "Swapchain rebuilt: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }
}

pub struct Renderer {
    capture: Option<FrameCapture>,
    frames: SwapchainResources,
    sync: Vec<FrameSync>,
    scene: Scene,
    // One-shot uploads and capture copies
    commands: CommandPool,
    settings: FrameSettings,
    start: Instant,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(config: &Config, window: &mut AppWindow) -> Result<Self> {
        let device = VulkanDevice::new(
            &config.window.title,
            config.validation_enabled(),
            window.window(),
        )?;

        let commands = CommandPool::new(device.clone(), device.queue_families.graphics)?;
        let scene = Scene::load(&device, &commands, config)?;

        let settings = FrameSettings {
            vsync: config.graphics.vsync,
            clear_color: config.graphics.clear_color,
            capture: config.capture.enabled,
        };

        let frames = SwapchainResources::new(
            device.clone(),
            &scene,
            settings,
            vk::SwapchainKHR::null(),
            &mut || window.wait_for_valid_size(),
        )?;

        let sync = create_frame_syncs(&device, config.graphics.max_frames_in_flight)?;

        let capture = if config.capture.enabled {
            Some(FrameCapture::new(&config.capture)?)
        } else {
            log::info!("Frame capture disabled");
            None
        };

        log::info!("Vulkan initialization complete!");

        Ok(Self {
            capture,
            frames,
            sync,
            scene,
            commands,
            settings,
            start: Instant::now(),
            device,
        })
    }

    pub fn image_count(&self) -> usize {
        self.frames.swapchain.image_count()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.len()
    }

    pub fn wait_for_slot(&self, slot: usize) -> Result<()> {
        self.sync[slot].wait()
    }

    pub fn acquire_image(&self, slot: usize) -> Result<AcquireOutcome> {
        self.frames
            .swapchain
            .acquire_next_image(self.sync[slot].image_available)
    }

    pub fn frames_captured(&self) -> u64 {
        self.capture.as_ref().map_or(0, FrameCapture::captured)
    }

    /// Copy the last presented content of `image` to the capture pipeline.
    pub fn capture_image(&mut self, image: usize) -> Result<CaptureProgress> {
        let (Some(capture), Some(target)) = (self.capture.as_mut(), &self.frames.capture_image)
        else {
            return Ok(CaptureProgress::Continue);
        };

        let extent = self.frames.swapchain.extent;
        let order = channel_order(self.frames.swapchain.format);

        copy_to_host_image(
            &self.device,
            &self.commands,
            self.frames.swapchain.images[image],
            target,
            extent,
        )?;

        capture.record(|frame| read_host_image(target, extent, order, frame))
    }

    pub fn update_uniforms(&mut self, image: usize) -> Result<()> {
        let extent = self.frames.swapchain.extent;
        let ubo = UniformBufferObject::new(
            self.start.elapsed().as_secs_f32(),
            extent.width,
            extent.height,
        );
        self.frames.uniform_buffers[image].write(&[ubo])
    }

    pub fn submit(&self, slot: usize, image: usize) -> Result<()> {
        let sync = &self.sync[slot];
        sync.reset()?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.frames.command_buffers[image]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")?;

        Ok(())
    }

    pub fn present(&self, slot: usize, image: usize) -> Result<PresentOutcome> {
        self.frames.swapchain.present(
            self.device.present_queue,
            image as u32,
            &[self.sync[slot].render_finished],
        )
    }

    pub fn recreate_swapchain(
        &mut self,
        framebuffer_size: &mut dyn FnMut() -> (u32, u32),
    ) -> Result<()> {
        self.frames
            .rebuild(&self.scene, self.settings, framebuffer_size)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Wait for GPU to finish before destroying anything
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {:#}", e);
        }
    }
}
