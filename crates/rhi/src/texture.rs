//! Sampled 2D texture with a full mip chain.
//!
//! Pixels are uploaded through a staging buffer into mip level 0; the
//! remaining levels are produced on the GPU with linear blits, each level
//! transitioned to `SHADER_READ_ONLY_OPTIMAL` as soon as it is final.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool, submit_one_time};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc, mip_levels_for};

/// Format used for all textures: 8-bit RGBA, sRGB-encoded.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Texture image plus the sampler bound alongside it.
pub struct Texture {
    sampler: vk::Sampler,
    image: Image,
    device: Arc<Device>,
}

impl Texture {
    /// Uploads `pixels` (tightly packed RGBA8, `width * height * 4` bytes)
    /// and builds the mip chain and sampler.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidResource`] if `pixels` has the wrong length
    /// - [`RhiError::UnsupportedFormat`] if the device cannot linearly
    ///   filter [`TEXTURE_FORMAT`] for blits
    pub fn from_rgba8(
        device: Arc<Device>,
        instance: &ash::Instance,
        pool: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected || expected == 0 {
            return Err(RhiError::InvalidResource(format!(
                "texture {}x{} needs {} bytes of RGBA8, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        let properties = device.format_properties(instance, TEXTURE_FORMAT);
        if !supports_linear_blit(&properties) {
            return Err(RhiError::UnsupportedFormat(format!(
                "{:?} does not support linear blitting",
                TEXTURE_FORMAT
            )));
        }

        let mip_levels = mip_levels_for(width, height);
        let extent = vk::Extent2D { width, height };

        let staging = Buffer::host_visible_with_data(device.clone(), BufferUsage::Staging, pixels)?;

        let image = Image::new(
            device.clone(),
            ImageDesc {
                name: "texture",
                extent,
                mip_levels,
                samples: vk::SampleCountFlags::TYPE_1,
                format: TEXTURE_FORMAT,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )?;

        submit_one_time(&device, pool, |cmd| {
            let all_levels = color_range(0, mip_levels);
            cmd.pipeline_barrier(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                &[vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.handle())
                    .subresource_range(all_levels)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)],
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            cmd.copy_buffer_to_image(
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            record_mipmaps(cmd, image.handle(), width, height, mip_levels);
        })?;

        let sampler = create_sampler(&device, mip_levels)?;

        info!(
            "Texture uploaded: {}x{}, {} mip level(s)",
            width, height, mip_levels
        );

        Ok(Self {
            sampler,
            image,
            device,
        })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

fn supports_linear_blit(properties: &vk::FormatProperties) -> bool {
    properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(base_mip_level)
        .level_count(level_count)
        .base_array_layer(0)
        .layer_count(1)
}

/// Next mip dimension: halved, never below 1.
fn half(dimension: i32) -> i32 {
    if dimension > 1 { dimension / 2 } else { 1 }
}

/// Records the blit chain. Level 0 must be in `TRANSFER_DST_OPTIMAL`;
/// afterwards every level is `SHADER_READ_ONLY_OPTIMAL`.
fn record_mipmaps(cmd: &CommandBuffer, image: vk::Image, width: u32, height: u32, mip_levels: u32) {
    let barrier = |level: u32,
                   old_layout: vk::ImageLayout,
                   new_layout: vk::ImageLayout,
                   src_access: vk::AccessFlags,
                   dst_access: vk::AccessFlags| {
        vk::ImageMemoryBarrier::default()
            .image(image)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(color_range(level, 1))
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
    };

    let mut mip_width = width as i32;
    let mut mip_height = height as i32;

    for level in 1..mip_levels {
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            &[barrier(
                level - 1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            )],
        );

        let blit = vk::ImageBlit::default()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_width,
                    y: mip_height,
                    z: 1,
                },
            ])
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(level - 1)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: half(mip_width),
                    y: half(mip_height),
                    z: 1,
                },
            ])
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(level)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        cmd.blit_image(
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            blit,
            vk::Filter::LINEAR,
        );

        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            &[barrier(
                level - 1,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_READ,
                vk::AccessFlags::SHADER_READ,
            )],
        );

        mip_width = half(mip_width);
        mip_height = half(mip_height);
    }

    // The last level was only ever a blit destination.
    cmd.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        &[barrier(
            mip_levels - 1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        )],
    );
}

fn sampler_create_info(max_anisotropy: f32, mip_levels: u32) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
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
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(mip_levels as f32)
}

fn create_sampler(device: &Device, mip_levels: u32) -> RhiResult<vk::Sampler> {
    let create_info =
        sampler_create_info(device.properties().limits.max_sampler_anisotropy, mip_levels);
    let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
    Ok(sampler)
}
