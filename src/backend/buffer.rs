// Vertex buffer backed by gpu-allocator
//
// The triangle is tiny and static, so it lives in host-visible memory and is
// written once through the persistent mapping.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

pub struct VertexBuffer {
    pub buffer: vk::Buffer,
    pub vertex_count: u32,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl VertexBuffer {
    /// Create a buffer and fill it with `vertices`
    pub fn new<T: Pod>(device: Arc<VulkanDevice>, name: &str, vertices: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(bytes.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create vertex buffer")?;

        // From here on Drop owns the buffer
        let mut vertex_buffer = Self {
            buffer,
            vertex_count: vertices.len() as u32,
            allocation: None,
            device,
        };
        vertex_buffer.bind_and_upload(name, bytes)?;

        log::debug!(
            "Vertex buffer '{}': {} vertices, {} bytes",
            name,
            vertex_buffer.vertex_count,
            bytes.len()
        );

        Ok(vertex_buffer)
    }

    fn bind_and_upload(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let requirements = unsafe { self.device.device.get_buffer_memory_requirements(self.buffer) };

        let allocation = self.device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let allocation = self.allocation.insert(allocation);

        unsafe {
            self.device
                .device
                .bind_buffer_memory(self.buffer, allocation.memory(), allocation.offset())
                .context("Failed to bind vertex buffer memory")?;
        }

        let mapped = allocation
            .mapped_slice_mut()
            .context("Vertex buffer memory is not host visible")?;
        mapped[..bytes.len()].copy_from_slice(bytes);

        Ok(())
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.free(allocation) {
                log::error!("Failed to free vertex buffer memory: {:?}", e);
            }
        }
    }
}
