// Images, views and layout transitions
//
// Every image the renderer creates (MSAA color, depth, texture, capture
// target) goes through `Image`, which owns the handle, its memory and an
// optional view.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RenderError;

/// Everything needed to create an image.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub name: &'static str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub location: MemoryLocation,
    /// Create a view with this aspect. `None` for images only used by copies.
    pub view_aspect: Option<vk::ImageAspectFlags>,
}

impl ImageDesc {
    /// Single-sample, optimal-tiling, device-local image with one mip level.
    pub fn new(
        name: &'static str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name,
            extent,
            format,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            location: MemoryLocation::GpuOnly,
            view_aspect: None,
        }
    }
}

pub struct Image {
    pub image: vk::Image,
    pub view: Option<vk::ImageView>,
    pub desc: ImageDesc,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Image {
    pub fn new(device: Arc<VulkanDevice>, desc: ImageDesc) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image '{}'", desc.name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: desc.location,
            linear: desc.tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e)
                    .with_context(|| format!("Failed to allocate memory for '{}'", desc.name));
            }
        };

        let mut result = Self {
            image,
            view: None,
            desc,
            allocation: Some(allocation),
            device,
        };

        if let Some(allocation) = &result.allocation {
            unsafe {
                result.device.device.bind_image_memory(
                    result.image,
                    allocation.memory(),
                    allocation.offset(),
                )
            }
            .with_context(|| format!("Failed to bind memory for '{}'", desc.name))?;
        }

        if let Some(aspect) = desc.view_aspect {
            result.view = Some(create_image_view(
                &result.device,
                result.image,
                desc.format,
                aspect,
                desc.mip_levels,
            )?);
        }

        Ok(result)
    }

    /// View handle, or a null handle for view-less images.
    pub fn view(&self) -> vk::ImageView {
        self.view.unwrap_or_default()
    }

    /// Offset and row pitch of the color subresource (linear images only).
    pub fn subresource_layout(&self) -> vk::SubresourceLayout {
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        unsafe {
            self.device
                .device
                .get_image_subresource_layout(self.image, subresource)
        }
    }

    /// Host view of the image memory.
    pub fn mapped(&self) -> Result<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or_else(|| RenderError::NotHostVisible(self.desc.name).into())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.view.take() {
                self.device.device.destroy_image_view(view, None);
            }
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free memory of '{}': {}", self.desc.name, e);
            }
        }
    }
}

pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(subresource_range(aspect_mask, 0, mip_levels));

    unsafe { device.device.create_image_view(&create_info, None) }
        .context("Failed to create image view")
}

pub fn subresource_range(
    aspect_mask: vk::ImageAspectFlags,
    base_mip_level: u32,
    level_count: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Access masks and pipeline stages for one layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Barrier recipe for the texture upload transitions. Any other pair is a
    /// bug in the caller.
    pub fn standard(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Result<Self> {
        use vk::ImageLayout as L;

        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (old, new) => return Err(RenderError::UnsupportedLayoutTransition { old, new }.into()),
        };

        Ok(Self {
            old_layout,
            new_layout,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }

    /// Transfer-stage transition with explicit access masks.
    pub fn transfer(
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> Self {
        Self {
            old_layout,
            new_layout,
            src_access,
            dst_access,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }
    }

    /// Record the barrier for `range` of `image`.
    pub fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .build();

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

/// First candidate whose tiling features include `features`.
pub fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RenderError::NoSupportedFormat(candidates.to_vec()).into())
}

/// Depth format for the depth attachment.
pub fn find_depth_format(device: &VulkanDevice) -> Result<vk::Format> {
    pick_supported_format(
        &[
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ],
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| device.format_properties(format),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions_have_recipes() {
        let to_dst = LayoutTransition::standard(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_dst.src_access, vk::AccessFlags::empty());
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = LayoutTransition::standard(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn other_transitions_are_rejected() {
        let err = LayoutTransition::standard(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::GENERAL,
        )
        .unwrap_err();

        match err.downcast_ref::<RenderError>() {
            Some(RenderError::UnsupportedLayoutTransition { old, new }) => {
                assert_eq!(*old, vk::ImageLayout::PRESENT_SRC_KHR);
                assert_eq!(*new, vk::ImageLayout::GENERAL);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn first_supported_depth_candidate_wins() {
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let picked = pick_supported_format(
            &candidates,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                let mut props = vk::FormatProperties::default();
                if format != vk::Format::D32_SFLOAT {
                    props.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
                }
                props
            },
        )
        .unwrap();
        assert_eq!(picked, vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn tiling_mode_selects_feature_set() {
        let props = |_: vk::Format| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        let features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

        assert!(pick_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::OPTIMAL,
            features,
            props
        )
        .is_err());
        assert!(pick_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            features,
            props
        )
        .is_ok());
    }
}
