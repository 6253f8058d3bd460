// GPU -> host copy of a presented swapchain image
//
// The swapchain image is copied into a linear, host-visible image on the
// graphics queue. Rows are then read out using the driver's row pitch.

use anyhow::Result;
use ash::vk;

use super::encoder::{CaptureFrame, ChannelOrder};
use crate::backend::commands::CommandPool;
use crate::backend::image::{subresource_range, Image, LayoutTransition};
use crate::backend::VulkanDevice;

/// Copy `source` (currently PRESENT_SRC) into `target` and wait for it.
pub fn copy_to_host_image(
    device: &VulkanDevice,
    commands: &CommandPool,
    source: vk::Image,
    target: &Image,
    extent: vk::Extent2D,
) -> Result<()> {
    let color = subresource_range(vk::ImageAspectFlags::COLOR, 0, 1);

    commands.one_time_submit(device.graphics_queue, |vk_device, cmd| {
        LayoutTransition::transfer(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        )
        .record(vk_device, cmd, target.image, color);

        LayoutTransition::transfer(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::MEMORY_READ,
            vk::AccessFlags::TRANSFER_READ,
        )
        .record(vk_device, cmd, source, color);

        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageCopy::builder()
            .src_subresource(layers)
            .dst_subresource(layers)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();

        unsafe {
            vk_device.cmd_copy_image(
                cmd,
                source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        // GENERAL so the host can read the linear image
        LayoutTransition::transfer(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::MEMORY_READ,
        )
        .record(vk_device, cmd, target.image, color);

        LayoutTransition::transfer(
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::MEMORY_READ,
        )
        .record(vk_device, cmd, source, color);

        Ok(())
    })
}

/// Read the linear capture image into `frame`.
pub fn read_host_image(
    target: &Image,
    extent: vk::Extent2D,
    order: ChannelOrder,
    frame: &mut CaptureFrame,
) -> Result<()> {
    let layout = target.subresource_layout();
    let memory = target.mapped()?;

    frame.prepare(extent.width, extent.height, order);
    let row_bytes = extent.width as usize * frame.channels as usize;
    copy_rows(
        memory,
        layout.offset as usize,
        layout.row_pitch as usize,
        row_bytes,
        extent.height as usize,
        &mut frame.pixels,
    )
}

/// Copy `height` rows of `row_bytes` each out of a pitched buffer.
pub fn copy_rows(
    src: &[u8],
    offset: usize,
    row_pitch: usize,
    row_bytes: usize,
    height: usize,
    dst: &mut [u8],
) -> Result<()> {
    if height == 0 {
        return Ok(());
    }
    anyhow::ensure!(row_pitch >= row_bytes, "Row pitch {} < row size {}", row_pitch, row_bytes);

    let needed = offset + row_pitch * (height - 1) + row_bytes;
    anyhow::ensure!(
        src.len() >= needed,
        "Mapped image holds {} bytes, {} needed",
        src.len(),
        needed
    );
    anyhow::ensure!(dst.len() >= row_bytes * height, "Destination too small");

    for (row, out) in dst.chunks_exact_mut(row_bytes).take(height).enumerate() {
        let start = offset + row * row_pitch;
        out.copy_from_slice(&src[start..start + row_bytes]);
    }
    Ok(())
}

/// Channel order of pixels in a swapchain of `format`.
pub fn channel_order(format: vk::Format) -> ChannelOrder {
    match format {
        vk::Format::B8G8R8A8_SRGB | vk::Format::B8G8R8A8_UNORM => ChannelOrder::Bgra,
        _ => ChannelOrder::Rgba,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_between_rows_is_skipped() {
        // 2 rows of 3 bytes, pitch 5, starting at offset 2
        let src = [9, 9, 1, 2, 3, 0, 0, 4, 5, 6];
        let mut dst = [0u8; 6];
        copy_rows(&src, 2, 5, 3, 2, &mut dst).unwrap();
        assert_eq!(dst, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn tight_rows_copy_straight_through() {
        let src: Vec<u8> = (0..16).collect();
        let mut dst = vec![0u8; 16];
        copy_rows(&src, 0, 8, 8, 2, &mut dst).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn short_source_is_an_error() {
        let src = [0u8; 7];
        let mut dst = [0u8; 8];
        assert!(copy_rows(&src, 0, 4, 4, 2, &mut dst).is_err());
    }

    #[test]
    fn bgra_swapchains_are_detected() {
        assert_eq!(channel_order(vk::Format::B8G8R8A8_SRGB), ChannelOrder::Bgra);
        assert_eq!(channel_order(vk::Format::R8G8B8A8_SRGB), ChannelOrder::Rgba);
    }
}
