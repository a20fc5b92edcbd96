// =============================================================================
// RENDERER - Owns the Vulkan handle graph and draws the triangle
// =============================================================================
//
// CREATION ORDER (destroyed in reverse in Drop):
//   instance -> debug messenger -> surface -> physical device -> device
//   -> swapchain + views -> render pass -> pipeline -> framebuffers
//   -> vertex buffer -> command pool + buffers -> frame sync
//
// Handles start out null so a failure halfway through construction still
// tears down whatever was created (destroying a null handle is a no-op).
//
// A window with no area (minimized) has no swapchain. Frames are skipped
// until a non-zero resize arrives, then the swapchain is rebuilt.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::path::PathBuf;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer::VertexBuffer;
use crate::backend::commands::{self, TriangleDraw};
use crate::backend::sync::{self, FrameSync};
use crate::backend::{pipeline, selection, DeviceOptions, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::vertex::TRIANGLE_VERTICES;

/// The parts of the config the renderer keeps using after startup
#[derive(Debug, Clone)]
struct RenderSettings {
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    frames_in_flight: usize,
    shader_dir: PathBuf,
}

/// What the next frame should do before drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameGate {
    /// Nothing to draw into
    Skip,
    /// Swapchain is stale, rebuild first
    Recreate,
    Draw,
}

/// Window size and swapchain staleness, kept apart from the GPU objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SurfaceState {
    window_size: (u32, u32),
    needs_resize: bool,
    is_minimized: bool,
}

impl SurfaceState {
    fn new(width: u32, height: u32) -> Self {
        Self {
            window_size: (width, height),
            needs_resize: false,
            is_minimized: width == 0 || height == 0,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
        if width == 0 || height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_resize = true;
        }
    }

    /// Window size to build a swapchain for, `None` while minimized
    fn drawable_size(&self) -> Option<(u32, u32)> {
        let (width, height) = self.window_size;
        (width > 0 && height > 0).then_some((width, height))
    }

    /// Acquire or present reported an out-of-date or suboptimal swapchain
    fn mark_out_of_date(&mut self) {
        self.needs_resize = true;
    }

    fn swapchain_created(&mut self) {
        self.needs_resize = false;
        self.is_minimized = false;
    }

    /// The surface had no area even though the window did; wait for the next
    /// resize before trying again
    fn swapchain_deferred(&mut self) {
        self.is_minimized = true;
        self.needs_resize = true;
    }

    fn gate(&self) -> FrameGate {
        if self.is_minimized {
            FrameGate::Skip
        } else if self.needs_resize {
            FrameGate::Recreate
        } else {
            FrameGate::Draw
        }
    }
}

pub struct Renderer {
    settings: RenderSettings,

    device: Arc<VulkanDevice>,
    swapchain: Option<Swapchain>,

    /// Format the render pass and pipeline were built for
    surface_format: vk::Format,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    framebuffers: Vec<vk::Framebuffer>,

    vertex_buffer: Option<VertexBuffer>,

    command_pool: vk::CommandPool,
    /// One per frame in flight, re-recorded every frame
    command_buffers: Vec<vk::CommandBuffer>,

    frame_sync: Vec<FrameSync>,
    /// Fence of the frame currently using each swapchain image
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,

    wait_stages: [vk::PipelineStageFlags; 1],

    surface: SurfaceState,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let options = DeviceOptions {
            enable_validation: config.validation_enabled(),
            verbose_validation: config.debug.verbose_validation,
            require_geometry_shader: config.graphics.require_geometry_shader,
        };

        let device = VulkanDevice::new(
            &config.window.title,
            options,
            window.raw_display_handle(),
            window.raw_window_handle(),
        )?;

        let size = window.inner_size();

        let mut renderer = Self {
            settings: RenderSettings {
                clear_color: config.graphics.clear_color,
                present_mode: config.present_mode(),
                frames_in_flight: config.frames_in_flight(),
                shader_dir: config.graphics.shader_dir.clone(),
            },
            device,
            swapchain: None,
            surface_format: vk::Format::UNDEFINED,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
            vertex_buffer: None,
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            frame_sync: Vec::new(),
            images_in_flight: Vec::new(),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            surface: SurfaceState::new(size.width, size.height),
        };

        renderer.init()?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn init(&mut self) -> Result<()> {
        // A window that starts minimized gets its swapchain (and pipeline) on
        // the first non-zero resize
        match self.surface.drawable_size() {
            Some((width, height)) => self.create_swapchain_resources(width, height)?,
            None => log::info!("Window starts minimized, deferring swapchain creation"),
        }

        let vertex_buffer =
            VertexBuffer::new(self.device.clone(), "triangle vertices", &TRIANGLE_VERTICES)?;
        self.vertex_buffer = Some(vertex_buffer);

        let device = &self.device.device;
        self.command_pool = commands::create_command_pool(device, self.device.graphics_queue_family)?;
        self.command_buffers = commands::allocate_command_buffers(
            device,
            self.command_pool,
            self.settings.frames_in_flight as u32,
        )?;

        for _ in 0..self.settings.frames_in_flight {
            self.frame_sync.push(FrameSync::new(device)?);
        }

        Ok(())
    }

    /// Build (or rebuild) everything that depends on the swapchain.
    ///
    /// The render pass and pipeline only depend on the surface format, so
    /// they are rebuilt only when that changes. If the surface has no area
    /// nothing is created and the renderer waits for the next resize.
    fn create_swapchain_resources(&mut self, width: u32, height: u32) -> Result<()> {
        self.destroy_framebuffers();

        let old = self.swapchain.take();
        let swapchain = Swapchain::new(
            self.device.clone(),
            width,
            height,
            self.settings.present_mode,
            old.as_ref(),
        )?;
        // Retired only after the new one exists
        drop(old);

        let Some(swapchain) = swapchain else {
            self.images_in_flight.clear();
            self.surface.swapchain_deferred();
            return Ok(());
        };

        if self.surface_format != swapchain.format {
            if self.surface_format != vk::Format::UNDEFINED {
                log::warn!("Surface format changed to {:?}, rebuilding pipeline", swapchain.format);
            }
            self.destroy_pipeline();
            self.render_pass = pipeline::create_render_pass(&self.device, swapchain.format)?;
            let (pipeline, layout) = pipeline::create_graphics_pipeline(
                &self.device,
                self.render_pass,
                &self.settings.shader_dir,
            )?;
            self.pipeline = pipeline;
            self.pipeline_layout = layout;
            self.surface_format = swapchain.format;
        }

        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &swapchain.image_views,
            self.render_pass,
            swapchain.extent,
        )?;
        log::debug!(
            "Swapchain ready: {}x{}, {:?}",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.present_mode
        );
        self.images_in_flight = vec![vk::Fence::null(); swapchain.images.len()];
        self.swapchain = Some(swapchain);
        self.surface.swapchain_created();

        Ok(())
    }

    /// Recreate the swapchain after a resize, skipping while minimized
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        let Some((width, height)) = self.surface.drawable_size() else {
            return Ok(());
        };

        self.device.wait_idle()?;
        self.create_swapchain_resources(width, height)
    }

    /// Record a new window size; the swapchain is rebuilt on the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
    }

    /// Render a single frame. Returns false when nothing was presented.
    pub fn draw_frame(&mut self) -> Result<bool> {
        match self.surface.gate() {
            FrameGate::Skip => return Ok(false),
            FrameGate::Recreate => {
                self.recreate_swapchain()?;
                if self.surface.gate() != FrameGate::Draw {
                    return Ok(false);
                }
            }
            FrameGate::Draw => {}
        }

        let device = self.device.clone();
        let frame = &self.frame_sync[self.current_frame];
        let (image_available, render_finished, in_flight) =
            (frame.image_available, frame.render_finished, frame.in_flight_fence);

        // Wait until this slot's previous submission has finished
        unsafe {
            device
                .device
                .wait_for_fences(&[in_flight], true, u64::MAX)
                .context("Failed to wait for in-flight fence")?;
        }

        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;

        let Some((image_index, suboptimal)) =
            swapchain.acquire_next_image(u64::MAX, image_available)?
        else {
            self.surface.mark_out_of_date();
            return Ok(false);
        };
        let image = image_index as usize;

        // An earlier frame may still be rendering into this image
        let image_fence = self.images_in_flight[image];
        if image_fence != vk::Fence::null() && image_fence != in_flight {
            unsafe {
                device
                    .device
                    .wait_for_fences(&[image_fence], true, u64::MAX)
                    .context("Failed to wait for swapchain image fence")?;
            }
        }
        self.images_in_flight[image] = in_flight;

        let cmd = self.command_buffers[self.current_frame];
        let vertex_buffer = self
            .vertex_buffer
            .as_ref()
            .context("Vertex buffer not initialized")?;

        unsafe {
            device
                .device
                .reset_fences(&[in_flight])
                .context("Failed to reset in-flight fence")?;
            device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
        }

        commands::record_triangle(
            &device.device,
            cmd,
            &TriangleDraw {
                render_pass: self.render_pass,
                framebuffer: self.framebuffers[image],
                extent: swapchain.extent,
                pipeline: self.pipeline,
                vertex_buffer: vertex_buffer.buffer,
                vertex_count: vertex_buffer.vertex_count,
                clear_color: self.settings.clear_color,
            },
        )?;

        let wait_semaphores = [image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], in_flight)
                .context("Failed to submit draw command buffer")?;
        }

        let needs_recreate =
            swapchain.present(device.present_queue, image_index, &signal_semaphores)?;
        if needs_recreate || suboptimal {
            self.surface.mark_out_of_date();
        }

        self.current_frame = sync::next_frame(self.current_frame, self.settings.frames_in_flight);

        Ok(true)
    }

    pub fn gpu_name(&self) -> String {
        selection::driver_string(&self.device.properties.device_name)
            .to_string_lossy()
            .into_owned()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn destroy_pipeline(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
        self.pipeline = vk::Pipeline::null();
        self.pipeline_layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for GPU before cleanup: {:?}", e);
        }

        for sync in self.frame_sync.drain(..) {
            sync.destroy(&self.device.device);
        }

        // Also frees the command buffers
        unsafe {
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
        }
        self.command_buffers.clear();

        self.vertex_buffer = None;

        self.destroy_framebuffers();
        self.destroy_pipeline();

        self.swapchain = None;

        // The device (and with it the surface and instance) goes when the
        // last Arc is dropped, right after this.
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_minimized_with_zero_sized_window() {
        let state = SurfaceState::new(0, 600);
        assert_eq!(state.gate(), FrameGate::Skip);
        assert_eq!(state.drawable_size(), None);

        let state = SurfaceState::new(800, 600);
        assert_eq!(state.gate(), FrameGate::Draw);
        assert_eq!(state.drawable_size(), Some((800, 600)));
    }

    #[test]
    fn minimize_then_restore_recreates() {
        let mut state = SurfaceState::new(800, 600);

        state.resize(0, 0);
        assert_eq!(state.gate(), FrameGate::Skip);
        assert_eq!(state.drawable_size(), None);

        state.resize(800, 600);
        assert_eq!(state.gate(), FrameGate::Recreate);
        assert_eq!(state.drawable_size(), Some((800, 600)));

        state.swapchain_created();
        assert_eq!(state.gate(), FrameGate::Draw);
    }

    #[test]
    fn out_of_date_swapchain_requests_recreation() {
        let mut state = SurfaceState::new(800, 600);
        state.mark_out_of_date();
        assert_eq!(state.gate(), FrameGate::Recreate);

        state.swapchain_created();
        assert_eq!(state.gate(), FrameGate::Draw);
    }

    #[test]
    fn zero_sized_surface_waits_for_next_resize() {
        let mut state = SurfaceState::new(800, 600);
        state.mark_out_of_date();

        // Window still claims a size but the surface reported no area
        state.swapchain_deferred();
        assert_eq!(state.gate(), FrameGate::Skip);

        state.resize(1024, 768);
        assert_eq!(state.gate(), FrameGate::Recreate);
    }
}
