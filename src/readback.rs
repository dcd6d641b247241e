use wgpu::{
    Buffer, BufferDescriptor, BufferUsages, CommandEncoderDescriptor, Device, Maintain, MapMode,
    Queue,
};

use crate::{Error, Result};

/// Copies the content of a block buffer back to the host.
///
/// The buffer must have been created with [`BufferUsages::COPY_SRC`], which is the case for
/// buffers returned by [`crate::AstcEncoder::encode`]. Blocks until the copy is finished.
pub fn download_blocks(device: &Device, queue: &Queue, block_buffer: &Buffer) -> Result<Vec<u8>> {
    let size = block_buffer.size();

    let staging_buffer = device.create_buffer(&BufferDescriptor {
        label: Some("astc staging buffer"),
        size,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut copy_encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("astc copy encoder"),
    });
    copy_encoder.copy_buffer_to_buffer(block_buffer, 0, &staging_buffer, 0, size);
    queue.submit([copy_encoder.finish()]);

    let result = {
        let buffer_slice = staging_buffer.slice(..);

        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(MapMode::Read, move |v| {
            let _ = tx.send(v);
        });

        device.poll(Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => buffer_slice.get_mapped_range().to_vec(),
            Ok(Err(error)) => return Err(Error::GpuDispatch(error.to_string())),
            Err(_) => {
                return Err(Error::GpuDispatch(
                    "buffer mapping callback was dropped".to_string(),
                ))
            }
        }
    };

    staging_buffer.unmap();

    tracing::trace!("downloaded {} bytes of block data", result.len());

    Ok(result)
}
