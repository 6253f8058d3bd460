// Mipmapped texture + sampler
//
// Decoded on the CPU with the `image` crate, staged into a device-local
// image, then the mip chain is produced on the GPU with linear blits.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::buffer::Buffer;
use super::commands::CommandPool;
use super::image::{subresource_range, Image, ImageDesc, LayoutTransition};
use super::VulkanDevice;
use crate::error::RenderError;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Number of levels in a full mip chain: `floor(log2(max(w, h))) + 1`.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Half a mip dimension, never below one texel.
fn half(dimension: i32) -> i32 {
    if dimension > 1 {
        dimension / 2
    } else {
        1
    }
}

pub struct Texture {
    pub sampler: Sampler,
    pub image: Image,
}

impl Texture {
    /// Load an image file as an sRGB texture with a full mip chain.
    pub fn from_file(
        device: Arc<VulkanDevice>,
        commands: &CommandPool,
        path: &Path,
    ) -> Result<Self> {
        let pixels = image::open(path)
            .with_context(|| format!("Failed to load texture {:?}", path))?
            .to_rgba8();
        let (width, height) = pixels.dimensions();

        log::info!("Loaded texture {:?}: {}x{}", path, width, height);

        Self::from_rgba(device, commands, width, height, pixels.as_raw())
    }

    pub fn from_rgba(
        device: Arc<VulkanDevice>,
        commands: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self> {
        // Blit-based mip generation needs linear filtering on this format
        let props = device.format_properties(TEXTURE_FORMAT);
        if !props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(RenderError::LinearBlitUnsupported(TEXTURE_FORMAT).into());
        }

        let mip_levels = mip_levels(width, height);

        let staging = Buffer::with_data(
            device.clone(),
            "texture staging",
            vk::BufferUsageFlags::TRANSFER_SRC,
            pixels,
        )?;

        let mut desc = ImageDesc::new(
            "texture",
            vk::Extent2D { width, height },
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        );
        desc.mip_levels = mip_levels;
        desc.view_aspect = Some(vk::ImageAspectFlags::COLOR);
        let image = Image::new(device.clone(), desc)?;

        let to_transfer = LayoutTransition::standard(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        commands.one_time_submit(device.graphics_queue, |vk_device, cmd| {
            to_transfer.record(
                vk_device,
                cmd,
                image.image,
                subresource_range(vk::ImageAspectFlags::COLOR, 0, mip_levels),
            );

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                })
                .build();

            unsafe {
                vk_device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            record_mipmaps(vk_device, cmd, image.image, width, height, mip_levels)
        })?;

        let sampler = Sampler::new(device, mip_levels)?;

        Ok(Self { sampler, image })
    }
}

/// Blit each level into the next. Every level ends in SHADER_READ_ONLY.
fn record_mipmaps(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) -> Result<()> {
    let to_source = LayoutTransition::transfer(
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::AccessFlags::TRANSFER_READ,
    );
    let source_to_read = LayoutTransition {
        old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_access: vk::AccessFlags::TRANSFER_READ,
        dst_access: vk::AccessFlags::SHADER_READ,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
    };

    let mut mip_width = width as i32;
    let mut mip_height = height as i32;

    for level in 1..mip_levels {
        let source = subresource_range(vk::ImageAspectFlags::COLOR, level - 1, 1);
        to_source.record(device, cmd, image, source);

        let blit = vk::ImageBlit::builder()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_width,
                    y: mip_height,
                    z: 1,
                },
            ])
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: half(mip_width),
                    y: half(mip_height),
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        source_to_read.record(device, cmd, image, source);

        mip_width = half(mip_width);
        mip_height = half(mip_height);
    }

    // The last level was only ever written to
    let last = LayoutTransition::standard(
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;
    last.record(
        device,
        cmd,
        image,
        subresource_range(vk::ImageAspectFlags::COLOR, mip_levels - 1, 1),
    );

    Ok(())
}

pub struct Sampler {
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Sampler {
    pub fn new(device: Arc<VulkanDevice>, mip_levels: u32) -> Result<Self> {
        let max_anisotropy = 16.0_f32.min(device.properties.limits.max_sampler_anisotropy);

        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(mip_levels as f32)
            .mip_lod_bias(0.0);

        let sampler = unsafe { device.device.create_sampler(&create_info, None) }
            .context("Failed to create texture sampler")?;

        Ok(Self { sampler, device })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_length() {
        assert_eq!(mip_levels(512, 256), 10);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(256, 512), 10);
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(1024, 1024), 11);
        assert_eq!(mip_levels(300, 17), 9);
    }

    #[test]
    fn halving_stops_at_one() {
        assert_eq!(half(512), 256);
        assert_eq!(half(3), 1);
        assert_eq!(half(1), 1);
    }
}
