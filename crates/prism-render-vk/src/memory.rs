// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and the memory behind them. Handle and memory are
//! allocated together and released together.

use ash::vk;
use bytemuck::Pod;

use crate::device::DeviceContext;
use crate::error::{CallExt, VkError, VkResult};
use crate::teardown::{guarded, Record};

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> VkResult<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(VkError::NoSuitableMemoryType { type_bits, flags })
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GpuBuffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn records(&self) -> [Record; 2] {
        [Record::Buffer(self.handle), Record::Memory(self.memory)]
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GpuImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub mip_levels: u32,
}

impl GpuImage {
    pub fn records(&self) -> [Record; 3] {
        [
            Record::ImageView(self.view),
            Record::Image(self.handle),
            Record::Memory(self.memory),
        ]
    }
}

pub unsafe fn create_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> VkResult<GpuBuffer> {
    let d = &ctx.device;
    unsafe {
        guarded(ctx, |undo| -> VkResult<GpuBuffer> {
            let bci = vk::BufferCreateInfo {
                s_type: vk::StructureType::BUFFER_CREATE_INFO,
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            let handle = d.create_buffer(&bci, None).call("vkCreateBuffer")?;
            undo.push(Record::Buffer(handle));

            let req = d.get_buffer_memory_requirements(handle);
            let mai = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index: find_memory_type(
                    &ctx.memory_properties,
                    req.memory_type_bits,
                    props,
                )?,
                ..Default::default()
            };
            let memory = d.allocate_memory(&mai, None).call("vkAllocateMemory")?;
            undo.push(Record::Memory(memory));
            d.bind_buffer_memory(handle, memory, 0)
                .call("vkBindBufferMemory")?;
            Ok(GpuBuffer {
                handle,
                memory,
                size,
            })
        })
    }
}

pub unsafe fn write_mapped<T: Pod>(
    ctx: &DeviceContext,
    memory: vk::DeviceMemory,
    data: &[T],
) -> VkResult<()> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    unsafe {
        let ptr = ctx
            .device
            .map_memory(
                memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )
            .call("vkMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
        ctx.device.unmap_memory(memory);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct ImageSpec {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

pub unsafe fn create_image_view(
    ctx: &DeviceContext,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> VkResult<vk::ImageView> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    unsafe { ctx.device.create_image_view(&view_ci, None) }.call("vkCreateImageView")
}

pub unsafe fn create_image(ctx: &DeviceContext, spec: &ImageSpec) -> VkResult<GpuImage> {
    let d = &ctx.device;
    unsafe {
        guarded(ctx, |undo| -> VkResult<GpuImage> {
            let img_ci = vk::ImageCreateInfo {
                s_type: vk::StructureType::IMAGE_CREATE_INFO,
                image_type: vk::ImageType::TYPE_2D,
                format: spec.format,
                extent: vk::Extent3D {
                    width: spec.extent.width,
                    height: spec.extent.height,
                    depth: 1,
                },
                mip_levels: spec.mip_levels,
                array_layers: 1,
                samples: spec.samples,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: spec.usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            };
            let handle = d.create_image(&img_ci, None).call("vkCreateImage")?;
            undo.push(Record::Image(handle));

            let req = d.get_image_memory_requirements(handle);
            let alloc = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index: find_memory_type(
                    &ctx.memory_properties,
                    req.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?,
                ..Default::default()
            };
            let memory = d.allocate_memory(&alloc, None).call("vkAllocateMemory")?;
            undo.push(Record::Memory(memory));
            d.bind_image_memory(handle, memory, 0)
                .call("vkBindImageMemory")?;

            let view = create_image_view(ctx, handle, spec.format, spec.aspect, spec.mip_levels)?;
            Ok(GpuImage {
                handle,
                view,
                memory,
                format: spec.format,
                mip_levels: spec.mip_levels,
            })
        })
    }
}
