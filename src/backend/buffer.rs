// Vertex buffer backed by gpu-allocator
//
// Host-visible memory is plenty for three vertices written once; no
// staging copy.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::vertex::Vertex;

pub struct VertexBuffer {
    pub buffer: vk::Buffer,
    pub vertex_count: u32,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl VertexBuffer {
    pub fn new(device: Arc<VulkanDevice>, vertices: &[Vertex]) -> Result<Self> {
        if vertices.is_empty() {
            anyhow::bail!("Cannot create an empty vertex buffer");
        }

        let bytes: &[u8] = bytemuck::cast_slice(vertices);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(bytes.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create vertex buffer")?;

        match Self::allocate_and_fill(&device, buffer, bytes) {
            Ok(allocation) => {
                log::debug!("Uploaded {} vertices ({} bytes)", vertices.len(), bytes.len());
                Ok(Self {
                    buffer,
                    vertex_count: vertices.len() as u32,
                    allocation: Some(allocation),
                    device,
                })
            }
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    fn allocate_and_fill(
        device: &VulkanDevice,
        buffer: vk::Buffer,
        bytes: &[u8],
    ) -> Result<Allocation> {
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let mut guard = device.allocator.lock();
        let allocator = guard.as_mut().context("Allocator already destroyed")?;

        let mut allocation = allocator
            .allocate(&AllocationCreateDesc {
                name: "triangle vertices",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate vertex buffer memory")?;

        let written = match allocation.mapped_slice_mut() {
            Some(mapped) => {
                mapped[..bytes.len()].copy_from_slice(bytes);
                true
            }
            None => false,
        };

        let bound = written
            && unsafe {
                device
                    .device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            }
            .is_ok();

        if !bound {
            let reason = if written {
                "Failed to bind vertex buffer memory"
            } else {
                "Vertex buffer memory is not host-mappable"
            };
            let _ = allocator.free(allocation);
            anyhow::bail!(reason);
        }

        Ok(allocation)
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }

        if let (Some(allocation), Some(allocator)) =
            (self.allocation.take(), self.device.allocator.lock().as_mut())
        {
            if let Err(e) = allocator.free(allocation) {
                log::warn!("Failed to free vertex buffer memory: {}", e);
            }
        }
    }
}
