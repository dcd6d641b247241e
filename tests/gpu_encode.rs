use astc_compression::{
    download_blocks, encode::compress_rgba8, encode_astc, AstcEncoder, BlockFootprint,
    EncodeOption, Error,
};
use wgpu::{Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages};

use crate::common::{
    create_blocks_buffer, create_texture, create_wgpu_resources, decode_blocks, gradient_image,
    metrics::calculate_image_metrics, noise_image,
};

mod common;

const FOOTPRINTS: [BlockFootprint; 2] = [BlockFootprint::FourByFour, BlockFootprint::SixBySix];

#[test]
fn solid_color_matches_cpu_exactly() {
    let (device, queue) = create_wgpu_resources();

    for footprint in FOOTPRINTS {
        let (width, height) = (20, 13);
        let rgba = [12, 200, 99, 255].repeat((width * height) as usize);
        let option = EncodeOption::new(footprint);

        let texture = create_texture(&device, &queue, &rgba, width, height, false);
        let buffer = encode_astc(&device, &queue, &texture, option).unwrap();
        assert_eq!(
            buffer.size() as usize,
            footprint.blocks_byte_size(width, height)
        );

        let blocks = download_blocks(&device, &queue, &buffer).unwrap();
        assert_eq!(decode_blocks(&blocks, footprint, width, height), rgba);

        let mut cpu_blocks = vec![0; blocks.len()];
        compress_rgba8(option, &rgba, &mut cpu_blocks, width, height, width * 4).unwrap();
        assert_eq!(blocks, cpu_blocks);
    }
}

#[test]
fn gradient_quality_is_close_to_cpu() {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let (width, height) = (64, 48);
    let rgba = gradient_image(width, height);

    for footprint in FOOTPRINTS {
        for has_alpha in [false, true] {
            let option = EncodeOption {
                footprint,
                has_alpha,
                ..Default::default()
            };
            let channels: &[usize] = if has_alpha { &[0, 1, 2, 3] } else { &[0, 1, 2] };

            let texture = create_texture(&device, &queue, &rgba, width, height, false);
            let buffer = encoder.encode(&texture, option).unwrap();
            let blocks = download_blocks(&device, &queue, &buffer).unwrap();
            let gpu = decode_blocks(&blocks, footprint, width, height);

            let mut cpu_blocks = vec![0; blocks.len()];
            compress_rgba8(option, &rgba, &mut cpu_blocks, width, height, width * 4).unwrap();
            let cpu = decode_blocks(&cpu_blocks, footprint, width, height);

            let gpu_psnr =
                calculate_image_metrics(&rgba, &gpu, width, height, channels, false).overall_psnr;
            let cpu_psnr =
                calculate_image_metrics(&rgba, &cpu, width, height, channels, false).overall_psnr;

            assert!(
                gpu_psnr > cpu_psnr - 1.0,
                "{footprint} alpha {has_alpha}: gpu {gpu_psnr:.2} dB, cpu {cpu_psnr:.2} dB"
            );
        }
    }
}

#[test]
fn gpu_encoding_is_deterministic() {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let (width, height) = (37, 29);
    let rgba = noise_image(width, height, 11);
    let texture = create_texture(&device, &queue, &rgba, width, height, true);
    let option = EncodeOption {
        footprint: BlockFootprint::SixBySix,
        srgb: true,
        ..Default::default()
    };

    let first = encoder.encode(&texture, option).unwrap();
    let second = encoder.encode(&texture, option).unwrap();

    assert_eq!(
        download_blocks(&device, &queue, &first).unwrap(),
        download_blocks(&device, &queue, &second).unwrap()
    );
}

#[test]
fn normal_maps_decode_to_rrrg() {
    let (device, queue) = create_wgpu_resources();

    let (width, height) = (16, 16);
    let rgba = gradient_image(width, height);
    let option = EncodeOption {
        normal_map: true,
        ..Default::default()
    };

    let texture = create_texture(&device, &queue, &rgba, width, height, false);
    let buffer = encode_astc(&device, &queue, &texture, option).unwrap();
    let blocks = download_blocks(&device, &queue, &buffer).unwrap();
    let decoded = decode_blocks(&blocks, option.footprint, width, height);

    assert!(decoded
        .chunks_exact(4)
        .all(|texel| texel[0] == texel[1] && texel[1] == texel[2]));
}

#[test]
fn unsupported_format_fails() {
    let (device, queue) = create_wgpu_resources();

    let texture = device.create_texture(&TextureDescriptor {
        label: Some("r8 texture"),
        size: Extent3d {
            width: 8,
            height: 8,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::R8Unorm,
        usage: TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });

    let result = encode_astc(&device, &queue, &texture, EncodeOption::default());
    assert!(matches!(
        result,
        Err(Error::UnsupportedTextureFormat(TextureFormat::R8Unorm))
    ));
}

#[test]
fn one_encoder_serves_every_variant() {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let (width, height) = (24, 24);
    let rgba = gradient_image(width, height);
    let texture = create_texture(&device, &queue, &rgba, width, height, false);

    let options = [
        EncodeOption::new(BlockFootprint::FourByFour),
        EncodeOption::new(BlockFootprint::SixBySix),
        EncodeOption {
            has_alpha: true,
            ..Default::default()
        },
        EncodeOption {
            footprint: BlockFootprint::SixBySix,
            normal_map: true,
            ..Default::default()
        },
    ];

    for option in options {
        let shared = encoder.encode(&texture, option).unwrap();
        let fresh = encode_astc(&device, &queue, &texture, option).unwrap();

        assert_eq!(
            download_blocks(&device, &queue, &shared).unwrap(),
            download_blocks(&device, &queue, &fresh).unwrap(),
            "{option:?}"
        );
    }
}

#[test]
fn srgb_textures_encode_their_stored_bytes() {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let (width, height) = (32, 32);
    let rgba = gradient_image(width, height);
    let option = EncodeOption {
        srgb: true,
        ..Default::default()
    };

    let mut psnr = Vec::new();
    for srgb_texture in [false, true] {
        let texture = create_texture(&device, &queue, &rgba, width, height, srgb_texture);
        let buffer = encoder.encode(&texture, option).unwrap();
        let blocks = download_blocks(&device, &queue, &buffer).unwrap();
        let decoded = decode_blocks(&blocks, option.footprint, width, height);
        psnr.push(
            calculate_image_metrics(&rgba, &decoded, width, height, &[0, 1, 2], true).overall_psnr,
        );
    }

    assert!(psnr[1] > 25.0, "{:.2} dB", psnr[1]);
    assert!((psnr[0] - psnr[1]).abs() < 0.5, "{psnr:?}");
}

#[test]
#[should_panic(expected = "pending tasks")]
fn encode_with_pending_tasks_panics() {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let texture = create_texture(&device, &queue, &gradient_image(8, 8), 8, 8, false);
    let view = texture.create_view(&Default::default());
    let blocks = create_blocks_buffer(&device, 64);
    encoder
        .add_encode_task(&view, 8, 8, EncodeOption::default(), &blocks, 0)
        .unwrap();

    let _ = encoder.encode(&texture, EncodeOption::default());
}
