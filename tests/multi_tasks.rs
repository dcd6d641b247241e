use astc_compression::{download_blocks, AstcEncoder, BlockFootprint, EncodeOption, Error};
use wgpu::{CommandEncoderDescriptor, ComputePassDescriptor, TextureFormat, TextureViewDescriptor};

use crate::common::{
    create_blocks_buffer, create_texture, create_wgpu_resources, gradient_image, noise_image,
};

mod common;

fn test_multi_task_encoding(footprint: BlockFootprint) {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let gradient_option = EncodeOption::new(footprint);
    let noise_option = EncodeOption {
        footprint,
        has_alpha: true,
        ..Default::default()
    };

    let gradient = create_texture(&device, &queue, &gradient_image(40, 24), 40, 24, false);
    let noise = create_texture(&device, &queue, &noise_image(18, 30, 5), 18, 30, false);

    let gradient_size = footprint.blocks_byte_size(40, 24);
    let noise_size = footprint.blocks_byte_size(18, 30);
    let gradient_blocks = (gradient_size / 16) as u32;

    let blocks = create_blocks_buffer(&device, (gradient_size + noise_size) as u64);

    let view_descriptor = TextureViewDescriptor {
        format: Some(TextureFormat::Rgba8Unorm),
        ..Default::default()
    };
    encoder
        .add_encode_task(
            &gradient.create_view(&view_descriptor),
            40,
            24,
            gradient_option,
            &blocks,
            0,
        )
        .unwrap();
    encoder
        .add_encode_task(
            &noise.create_view(&view_descriptor),
            18,
            30,
            noise_option,
            &blocks,
            gradient_blocks,
        )
        .unwrap();
    encoder.upload();

    let mut command_encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("command encoder"),
    });

    {
        let mut pass = command_encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("compute pass"),
            timestamp_writes: None,
        });

        encoder.compress(&mut pass);
    }

    queue.submit([command_encoder.finish()]);

    let shared = download_blocks(&device, &queue, &blocks).unwrap();

    let separate_gradient = encoder.encode(&gradient, gradient_option).unwrap();
    let separate_noise = encoder.encode(&noise, noise_option).unwrap();

    assert_eq!(
        shared[..gradient_size],
        download_blocks(&device, &queue, &separate_gradient).unwrap()[..],
        "gradient blocks differ"
    );
    assert_eq!(
        shared[gradient_size..],
        download_blocks(&device, &queue, &separate_noise).unwrap()[..],
        "noise blocks differ"
    );
}

#[test]
fn multi_task_encoding_4x4() {
    test_multi_task_encoding(BlockFootprint::FourByFour);
}

#[test]
fn multi_task_encoding_6x6() {
    test_multi_task_encoding(BlockFootprint::SixBySix);
}

#[test]
fn many_tasks_grow_the_uniform_buffer() {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let rgba = gradient_image(8, 8);
    let texture = create_texture(&device, &queue, &rgba, 8, 8, false);
    let view = texture.create_view(&TextureViewDescriptor::default());
    let option = EncodeOption::default();

    // Every task writes 4 blocks, more tasks than the initial uniform capacity.
    let task_count = 40;
    let blocks = create_blocks_buffer(&device, task_count * 4 * 16);
    for task in 0..task_count as u32 {
        encoder
            .add_encode_task(&view, 8, 8, option, &blocks, task * 4)
            .unwrap();
    }
    encoder.upload();

    let mut command_encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("command encoder"),
    });

    {
        let mut pass = command_encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("compute pass"),
            timestamp_writes: None,
        });

        encoder.compress(&mut pass);
    }

    queue.submit([command_encoder.finish()]);

    let data = download_blocks(&device, &queue, &blocks).unwrap();
    let first = &data[..64];
    assert!(first.iter().any(|&byte| byte != 0));
    assert!(data.chunks_exact(64).all(|chunk| chunk == first));
}

#[test]
fn task_outside_of_buffer_fails() {
    let (device, queue) = create_wgpu_resources();
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let texture = create_texture(&device, &queue, &gradient_image(8, 8), 8, 8, false);
    let view = texture.create_view(&TextureViewDescriptor::default());
    let blocks = create_blocks_buffer(&device, 64);

    let result = encoder.add_encode_task(&view, 8, 8, EncodeOption::default(), &blocks, 1);
    assert!(matches!(
        result,
        Err(Error::BlockDataSize {
            expected: 80,
            actual: 64
        })
    ));
}
