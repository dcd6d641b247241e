#[derive(Debug, Clone)]
pub struct PsnrResult {
    pub overall_psnr: f64,
    pub overall_mse: f64,
    pub channel_results: [ChannelMetrics; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelMetrics {
    pub psnr: f64,
    pub mse: f64,
}

/// Calculates quality metrics of the selected channels. Both images must be RGBA8 data.
///
/// Color channels are compared in linear space when `srgb` is set.
pub fn calculate_image_metrics(
    original: &[u8],
    decoded: &[u8],
    width: u32,
    height: u32,
    channels: &[usize],
    srgb: bool,
) -> PsnrResult {
    assert_eq!(
        original.len(),
        decoded.len(),
        "image buffers must have same length"
    );
    assert_eq!(
        original.len(),
        (width * height * 4) as usize,
        "buffer size doesn't match dimensions"
    );

    let mut channel_mse = [0.0; 4];
    let pixel_count = (width * height) as f64;

    let to_float = |value: u8, channel: usize| {
        if srgb && channel < 3 {
            srgb_to_linear(value)
        } else {
            value as f64 / 255.0
        }
    };

    for (a, b) in original.chunks_exact(4).zip(decoded.chunks_exact(4)) {
        for channel in 0..4 {
            let diff = to_float(a[channel], channel) - to_float(b[channel], channel);
            channel_mse[channel] += diff * diff;
        }
    }

    channel_mse.iter_mut().for_each(|mse| *mse /= pixel_count);

    let calculate_psnr = |mse: f64| -> f64 {
        if mse == 0.0 {
            f64::INFINITY
        } else {
            20.0 * (1.0 / mse.sqrt()).log10()
        }
    };

    let overall_mse =
        channels.iter().map(|&c| channel_mse[c]).sum::<f64>() / channels.len() as f64;

    PsnrResult {
        overall_psnr: calculate_psnr(overall_mse),
        overall_mse,
        channel_results: channel_mse.map(|mse| ChannelMetrics {
            mse,
            psnr: calculate_psnr(mse),
        }),
    }
}

#[inline]
fn srgb_to_linear(srgb: u8) -> f64 {
    let v = (srgb as f64) / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}
