// =============================================================================
// RENDERER - everything needed to put the triangle on screen
// =============================================================================
//
// CREATION ORDER:
//   instance -> surface -> adapter -> device -> swapchain -> render pass
//   -> pipeline -> vertex buffer -> command buffers -> sync objects
//
// FRAME FLOW:
//   wait fence -> acquire image -> submit pre-recorded commands -> present
//
// Raw handles start out null and are filled in step by step. Destroying a
// null handle is a no-op in Vulkan, so Drop can clean up a renderer that
// failed halfway through construction.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::HasDisplayHandle;
use std::path::PathBuf;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::render_pass::{create_framebuffers, create_render_pass, destroy_framebuffers};
use crate::backend::sync::FrameSync;
use crate::backend::{
    pipeline, shader, Adapter, Surface, Swapchain, SwapchainRequest, VertexBuffer, VulkanDevice,
    VulkanInstance,
};
use crate::config::Config;
use crate::vertex::TRIANGLE;

/// The subset of the config the renderer keeps after startup
#[derive(Debug, Clone)]
struct RenderSettings {
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    frames_in_flight: usize,
}

pub struct Renderer {
    settings: RenderSettings,

    // Sync objects, one set per frame in flight
    frames: Vec<FrameSync>,
    current_frame: usize,
    /// Fence of the frame currently using each swapchain image
    images_in_flight: Vec<vk::Fence>,

    // One pre-recorded command buffer per swapchain image
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,

    framebuffers: Vec<vk::Framebuffer>,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vertex_buffer: Option<VertexBuffer>,

    /// Format the render pass and pipeline were built for
    color_format: vk::Format,

    // Must go before the surface; Drop clears it explicitly
    swapchain: Option<Swapchain>,
    surface: Surface,
    device: Arc<VulkanDevice>,

    surface_state: SurfaceState,
}

/// Window size bookkeeping that decides when the swapchain is rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SurfaceState {
    size: (u32, u32),
    needs_recreate: bool,
    minimized: bool,
}

impl SurfaceState {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            needs_recreate: false,
            minimized: false,
        }
    }

    /// A zero-sized window parks rendering until it grows again
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);

        if width == 0 || height == 0 {
            self.minimized = true;
        } else {
            self.minimized = false;
            self.needs_recreate = true;
        }
    }

    fn has_area(&self) -> bool {
        self.size.0 > 0 && self.size.1 > 0
    }
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let settings = RenderSettings {
            clear_color: config.graphics.clear_color,
            present_mode: config.present_mode(),
            vertex_shader: config.shaders.vertex.clone(),
            fragment_shader: config.shaders.fragment.clone(),
            frames_in_flight: config.frames_in_flight(),
        };

        // STEP 1: Instance, with the surface extensions this window needs
        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let instance =
            VulkanInstance::new(&config.window.title, display, config.validation_enabled())?;

        // STEP 2: Surface
        let surface = Surface::new(instance.clone(), window)?;

        // STEP 3: Adapter
        let adapter = Adapter::select(&instance, &surface, config.graphics.power_preference)?;

        // STEP 4: Device + queues
        let device = VulkanDevice::new(instance, &adapter)?;

        // STEP 5: Swapchain
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            SwapchainRequest {
                width: size.width,
                height: size.height,
                present_mode: settings.present_mode,
            },
            None,
        )?;
        let image_count = swapchain.images.len();
        let color_format = swapchain.format;

        let mut renderer = Self {
            settings,
            frames: Vec::new(),
            current_frame: 0,
            images_in_flight: vec![vk::Fence::null(); image_count],
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            framebuffers: Vec::new(),
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            vertex_buffer: None,
            color_format,
            swapchain: Some(swapchain),
            surface,
            device,
            surface_state: SurfaceState::new(size.width, size.height),
        };

        renderer.init_resources()?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    /// Steps 6 onwards: everything that hangs off the device and swapchain
    fn init_resources(&mut self) -> Result<()> {
        let device = self.device.clone();
        let (format, views, extent) = {
            let swapchain = self.swapchain()?;
            (swapchain.format, swapchain.image_views.clone(), swapchain.extent)
        };

        // STEP 6: Render pass + framebuffers
        self.render_pass = create_render_pass(&device, format)?;
        self.framebuffers = create_framebuffers(&device, &views, self.render_pass, extent)?;

        // STEP 7: Pipeline
        let (pipeline, layout) = build_pipeline(&device, self.render_pass, &self.settings)?;
        self.pipeline = pipeline;
        self.pipeline_layout = layout;

        // STEP 8: Geometry
        self.vertex_buffer = Some(VertexBuffer::new(device.clone(), &TRIANGLE)?);

        // STEP 9: Commands
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        self.command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        self.allocate_command_buffers()?;
        self.record_command_buffers()?;

        // STEP 10: Sync; these survive swapchain recreation
        for _ in 0..self.settings.frames_in_flight {
            self.frames.push(FrameSync::new(&device)?);
        }

        Ok(())
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().context("Swapchain not initialized")
    }

    // =========================================================================
    // COMMAND RECORDING
    // =========================================================================

    fn allocate_command_buffers(&mut self) -> Result<()> {
        let device = &self.device.device;

        if !self.command_buffers.is_empty() {
            unsafe { device.free_command_buffers(self.command_pool, &self.command_buffers) };
            self.command_buffers.clear();
        }

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(self.framebuffers.len() as u32);

        self.command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        Ok(())
    }

    /// Record the whole frame once per swapchain image
    ///
    /// The content never changes between frames, so the same buffers are
    /// resubmitted until a resize or shader reload invalidates them.
    fn record_command_buffers(&self) -> Result<()> {
        let device = &self.device.device;
        let extent = self.swapchain()?.extent;
        let vertex_buffer = self
            .vertex_buffer
            .as_ref()
            .context("Vertex buffer not initialized")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.settings.clear_color,
            },
        }];

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&self.framebuffers) {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass)
                .framebuffer(framebuffer)
                .render_area(scissor)
                .clear_values(&clear_values);

            unsafe {
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .context("Failed to begin command buffer")?;

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
                device.cmd_set_viewport(cmd, 0, &[viewport]);
                device.cmd_set_scissor(cmd, 0, &[scissor]);
                device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer.buffer], &[0]);
                device.cmd_draw(cmd, vertex_buffer.vertex_count, 1, 0, 0);
                device.cmd_end_render_pass(cmd);

                device
                    .end_command_buffer(cmd)
                    .context("Failed to end command buffer")?;
            }
        }

        log::debug!("Recorded {} command buffers", self.command_buffers.len());
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame; false when nothing was drawn
    pub fn render_frame(&mut self) -> Result<bool> {
        if self.surface_state.minimized {
            return Ok(false);
        }

        if self.surface_state.needs_recreate {
            self.recreate_swapchain()?;
            if self.surface_state.minimized {
                return Ok(false);
            }
        }

        let device = &self.device.device;
        let frame = &self.frames[self.current_frame];
        let (image_available, render_finished, in_flight) = (
            frame.image_available,
            frame.render_finished,
            frame.in_flight_fence,
        );

        // STEP 1: Wait until this slot's previous submission is done
        unsafe { device.wait_for_fences(&[in_flight], true, u64::MAX) }
            .context("Failed to wait for frame fence")?;

        // STEP 2: Acquire an image; the fence stays signaled if we bail here
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let Some((image_index, suboptimal)) =
            swapchain.acquire_next_image(u64::MAX, image_available)?
        else {
            self.surface_state.needs_recreate = true;
            return Ok(false);
        };

        // STEP 3: Another slot may still be drawing into this image
        let image_fence = self.images_in_flight[image_index as usize];
        if image_fence != vk::Fence::null() && image_fence != in_flight {
            unsafe { device.wait_for_fences(&[image_fence], true, u64::MAX) }
                .context("Failed to wait for image fence")?;
        }
        self.images_in_flight[image_index as usize] = in_flight;

        // STEP 4: Submit
        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[image_index as usize]];
        let signal_semaphores = [render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            device
                .reset_fences(&[in_flight])
                .context("Failed to reset frame fence")?;
            device
                .queue_submit(self.device.graphics_queue, &[submit_info], in_flight)
                .context("Failed to submit draw commands")?;
        }

        // STEP 5: Present
        let out_of_date =
            swapchain.present(self.device.present_queue, image_index, &signal_semaphores)?;

        if suboptimal || out_of_date {
            self.surface_state.needs_recreate = true;
        }

        // STEP 6: Advance to next frame slot
        self.current_frame = (self.current_frame + 1) % self.frames.len();

        Ok(true)
    }

    // =========================================================================
    // RESIZE + RELOAD
    // =========================================================================

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface_state.resize(width, height);
    }

    /// Schedule a recreation on the next frame (fullscreen toggles etc.)
    pub fn request_recreate(&mut self) {
        self.surface_state.needs_recreate = true;
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let (width, height) = self.surface_state.size;
        let caps = self.surface.capabilities(self.device.physical_device)?;
        let surface_empty = caps.current_extent.width == 0 || caps.current_extent.height == 0;
        if !self.surface_state.has_area() || surface_empty {
            self.surface_state.minimized = true;
            return Ok(());
        }

        self.device.wait_idle()?;

        let created = Swapchain::new(
            self.device.clone(),
            &self.surface,
            SwapchainRequest {
                width,
                height,
                present_mode: self.settings.present_mode,
            },
            self.swapchain.as_ref(),
        );

        destroy_framebuffers(&self.device, &self.framebuffers);
        self.framebuffers.clear();
        replace_retired(&mut self.swapchain, created)?;

        let device = self.device.clone();
        let (format, views, extent) = {
            let swapchain = self.swapchain()?;
            (swapchain.format, swapchain.image_views.clone(), swapchain.extent)
        };

        if format != self.color_format {
            log::info!("Surface format changed to {:?}, rebuilding pipeline", format);
            let render_pass = create_render_pass(&device, format)?;
            let built = build_pipeline(&device, render_pass, &self.settings);
            let (pipeline, layout) = match built {
                Ok(built) => built,
                Err(e) => {
                    unsafe { device.device.destroy_render_pass(render_pass, None) };
                    return Err(e);
                }
            };
            self.destroy_pipeline();
            unsafe { device.device.destroy_render_pass(self.render_pass, None) };
            self.render_pass = render_pass;
            self.pipeline = pipeline;
            self.pipeline_layout = layout;
            self.color_format = format;
        }

        self.framebuffers = create_framebuffers(&device, &views, self.render_pass, extent)?;
        self.allocate_command_buffers()?;
        self.record_command_buffers()?;
        self.images_in_flight = vec![vk::Fence::null(); views.len()];

        self.surface_state.needs_recreate = false;
        Ok(())
    }

    /// Rebuild the pipeline from the shader files on disk
    ///
    /// On error the previous pipeline stays in place.
    pub fn reload_shaders(&mut self) -> Result<()> {
        log::info!("Reloading shaders...");

        let (pipeline, layout) = build_pipeline(&self.device, self.render_pass, &self.settings)?;

        self.device.wait_idle()?;
        self.destroy_pipeline();
        self.pipeline = pipeline;
        self.pipeline_layout = layout;

        self.record_command_buffers()?;

        log::info!("Shaders reloaded");
        Ok(())
    }

    fn destroy_pipeline(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
        self.pipeline = vk::Pipeline::null();
        self.pipeline_layout = vk::PipelineLayout::null();
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

/// Drop the retired object in `slot` and store its replacement
///
/// A swapchain passed as old_swapchain is retired even when creation
/// fails, so it must not be kept around for the next attempt.
fn replace_retired<T>(slot: &mut Option<T>, created: Result<T>) -> Result<&T> {
    *slot = None;
    Ok(slot.insert(created?))
}

/// Load both shader stages and build the pipeline; modules are freed either way
fn build_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    settings: &RenderSettings,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let vert = shader::load_shader_module(device, &settings.vertex_shader)?;
    let frag = match shader::load_shader_module(device, &settings.fragment_shader) {
        Ok(frag) => frag,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vert, None) };
            return Err(e);
        }
    };

    let result = pipeline::create_graphics_pipeline(device, render_pass, vert, frag);

    unsafe {
        device.device.destroy_shader_module(vert, None);
        device.device.destroy_shader_module(frag, None);
    }

    result
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        let _ = self.device.wait_idle();

        let device = &self.device.device;
        unsafe {
            // Destroy in reverse order of creation
            for sync in &self.frames {
                sync.destroy(device);
            }

            // Also frees the command buffers
            device.destroy_command_pool(self.command_pool, None);

            destroy_framebuffers(&self.device, &self.framebuffers);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }

        self.vertex_buffer = None;
        // Swapchain before surface; the surface and device drop after this
        self.swapchain = None;

        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_minimizes_without_recreating() {
        let mut state = SurfaceState::new(1280, 720);
        state.resize(0, 720);
        assert!(state.minimized);
        assert!(!state.needs_recreate);
        assert!(!state.has_area());

        state.resize(1280, 0);
        assert!(state.minimized);
    }

    #[test]
    fn restoring_size_schedules_recreation() {
        let mut state = SurfaceState::new(1280, 720);
        state.resize(0, 0);
        state.resize(800, 600);
        assert_eq!(
            state,
            SurfaceState {
                size: (800, 600),
                needs_recreate: true,
                minimized: false,
            }
        );
        assert!(state.has_area());
    }

    #[test]
    fn failed_replacement_still_drops_the_old_value() {
        let mut slot = Some("old");
        assert!(replace_retired(&mut slot, Err(anyhow::anyhow!("out of memory"))).is_err());
        assert_eq!(slot, None);

        assert_eq!(*replace_retired(&mut slot, Ok("new")).unwrap(), "new");
        assert_eq!(slot, Some("new"));
    }

    #[test]
    fn fresh_state_draws_immediately() {
        let state = SurfaceState::new(640, 480);
        assert!(!state.minimized);
        assert!(!state.needs_recreate);
    }
}
