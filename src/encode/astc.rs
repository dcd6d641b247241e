use crate::encode::common::{
    encode_block_mode, encode_sequence, endpoint_range_for_bits, infill_weights, quantize_weight,
    select_partition, sequence_bits, unquantize_weight, BitWriter, ColorTables, WEIGHT_RANGES,
};
use crate::{BlockFootprint, EncodeOption};

pub(crate) const MAX_TEXELS: usize = 36;
const MAX_WEIGHTS: usize = 64;
const POWER_ITERATIONS: usize = 8;

/// Number of partition seeds tried for two partition modes.
pub(crate) const PARTITION_SEEDS: u32 = 32;

/// Color endpoint modes used by the encoder.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum EndpointMode {
    /// LDR luminance + alpha, direct.
    LuminanceAlpha,
    /// LDR RGB, direct.
    Rgb,
    /// LDR RGBA, direct.
    Rgba,
}

impl EndpointMode {
    pub(crate) const fn cem(self) -> u32 {
        match self {
            EndpointMode::LuminanceAlpha => 4,
            EndpointMode::Rgb => 8,
            EndpointMode::Rgba => 12,
        }
    }

    const fn value_count(self) -> usize {
        match self {
            EndpointMode::LuminanceAlpha => 4,
            EndpointMode::Rgb => 6,
            EndpointMode::Rgba => 8,
        }
    }
}

/// Shape of a candidate block mode.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) struct ModeShape {
    pub(crate) grid_width: u32,
    pub(crate) grid_height: u32,
    pub(crate) dual_plane: bool,
    pub(crate) partitions: u32,
}

const fn shape(grid_width: u32, grid_height: u32, dual_plane: bool, partitions: u32) -> ModeShape {
    ModeShape {
        grid_width,
        grid_height,
        dual_plane,
        partitions,
    }
}

const SHAPES_4X4: [ModeShape; 3] = [
    shape(4, 4, false, 1),
    shape(4, 4, true, 1),
    shape(4, 4, false, 2),
];

const SHAPES_6X6: [ModeShape; 7] = [
    shape(6, 6, false, 1),
    shape(5, 5, false, 1),
    shape(4, 4, false, 1),
    shape(4, 4, true, 1),
    shape(5, 5, false, 2),
    shape(4, 4, false, 2),
    shape(6, 6, false, 2),
];

pub(crate) const fn mode_shapes(footprint: BlockFootprint) -> &'static [ModeShape] {
    match footprint {
        BlockFootprint::FourByFour => &SHAPES_4X4,
        BlockFootprint::SixBySix => &SHAPES_6X6,
    }
}

/// Encoding profile derived from the [`EncodeOption`].
#[derive(Copy, Clone, Debug)]
pub(crate) struct Profile {
    pub(crate) footprint: BlockFootprint,
    pub(crate) endpoint_mode: EndpointMode,
    pub(crate) channel_weights: [f32; 4],
    /// Alpha may be stored in its own weight plane.
    pub(crate) dual_plane: bool,
    pub(crate) normal_map: bool,
    pub(crate) has_alpha: bool,
    pub(crate) srgb: bool,
}

impl Profile {
    pub(crate) fn new(option: &EncodeOption) -> Self {
        let (endpoint_mode, channel_weights) = if option.normal_map {
            (EndpointMode::LuminanceAlpha, [1.0, 0.0, 0.0, 1.0])
        } else if option.has_alpha {
            (EndpointMode::Rgba, [1.0, 1.0, 1.0, 1.0])
        } else {
            (EndpointMode::Rgb, [1.0, 1.0, 1.0, 0.0])
        };

        Self {
            footprint: option.footprint,
            endpoint_mode,
            channel_weights,
            dual_plane: option.normal_map || option.has_alpha,
            normal_map: option.normal_map,
            has_alpha: option.has_alpha,
            srgb: option.srgb,
        }
    }
}

/// Squared slope of the sRGB transfer function at an 8 bit value.
pub(crate) fn srgb_error_weight(value: f32) -> f32 {
    let s = value / 255.0;
    let slope = if s <= 0.04045 {
        1.0 / 12.92
    } else {
        2.4 / 1.055 * ((s + 0.055) / 1.055).powf(1.4)
    };
    (slope * slope).max(1.0 / 64.0)
}

/// Texels of one block with their error weights.
#[derive(Clone, Debug)]
pub(crate) struct BlockTexels {
    pub(crate) colors: [[f32; 4]; MAX_TEXELS],
    pub(crate) weights: [[f32; 4]; MAX_TEXELS],
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl BlockTexels {
    /// Loads the block at (`bx`, `by`). Texels outside of the image replicate the last
    /// column and row.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn load(
        profile: &Profile,
        rgba_data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        bx: u32,
        by: u32,
    ) -> Self {
        let block_width = profile.footprint.width();
        let block_height = profile.footprint.height();

        let mut texels = Self {
            colors: [[0.0; 4]; MAX_TEXELS],
            weights: [[0.0; 4]; MAX_TEXELS],
            width: block_width,
            height: block_height,
        };

        for y in 0..block_height {
            for x in 0..block_width {
                let pixel_x = (bx * block_width + x).min(width - 1) as usize;
                let pixel_y = (by * block_height + y).min(height - 1) as usize;
                let offset = pixel_y * stride + pixel_x * 4;

                let texel = [
                    rgba_data[offset],
                    rgba_data[offset + 1],
                    rgba_data[offset + 2],
                    rgba_data[offset + 3],
                ];
                texels.set((y * block_width + x) as usize, profile, texel);
            }
        }

        texels
    }

    fn set(&mut self, index: usize, profile: &Profile, texel: [u8; 4]) {
        let [r, g, b, a] = texel.map(f32::from);

        self.colors[index] = if profile.normal_map {
            [r, r, r, g]
        } else if profile.has_alpha {
            [r, g, b, a]
        } else {
            [r, g, b, 255.0]
        };

        let mut weights = profile.channel_weights;
        if profile.srgb && !profile.normal_map {
            for (weight, value) in weights.iter_mut().zip(self.colors[index]).take(3) {
                *weight *= srgb_error_weight(value);
            }
        }
        self.weights[index] = weights;
    }

    pub(crate) fn count(&self) -> usize {
        (self.width * self.height) as usize
    }

    fn uniform_color(&self) -> Option<[u8; 4]> {
        let first = self.colors[0];
        self.colors[1..self.count()]
            .iter()
            .all(|color| *color == first)
            .then(|| first.map(|c| c as u8))
    }
}

/// Encodes a constant color LDR block.
pub(crate) fn void_extent_block(color: [u8; 4]) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[..8].copy_from_slice(&0xFFFF_FFFF_FFFF_FDFCu64.to_le_bytes());
    for (channel, value) in color.iter().enumerate() {
        let unorm16 = *value as u16 * 257;
        block[8 + channel * 2..10 + channel * 2].copy_from_slice(&unorm16.to_le_bytes());
    }
    block
}

/// Fields of a fully quantized block.
#[derive(Clone, Debug)]
pub(crate) struct PackedBlock {
    pub(crate) grid_width: u32,
    pub(crate) grid_height: u32,
    pub(crate) dual_plane: bool,
    pub(crate) weight_range: usize,
    pub(crate) weights: [u8; MAX_WEIGHTS],
    pub(crate) color_component_selector: u32,
    pub(crate) partitions: u32,
    pub(crate) partition_seed: u32,
    pub(crate) endpoint_mode: EndpointMode,
    pub(crate) endpoint_range: usize,
    pub(crate) endpoints: [u8; 16],
}

impl PackedBlock {
    pub(crate) fn weight_count(&self) -> usize {
        (self.grid_width * self.grid_height * if self.dual_plane { 2 } else { 1 }) as usize
    }

    /// Packs the block into its 128 bit representation.
    pub(crate) fn pack(&self) -> [u8; 16] {
        let block_mode = encode_block_mode(
            self.grid_width,
            self.grid_height,
            self.dual_plane,
            self.weight_range,
        )
        .unwrap_or_default();

        let mut writer = BitWriter::default();
        writer.put(11, block_mode);
        writer.put(2, self.partitions - 1);
        if self.partitions == 1 {
            writer.put(4, self.endpoint_mode.cem());
        } else {
            writer.put(10, self.partition_seed);
            writer.put(6, self.endpoint_mode.cem() << 2);
        }

        let value_count = self.endpoint_mode.value_count() * self.partitions as usize;
        let endpoints: Vec<u32> = self.endpoints[..value_count]
            .iter()
            .map(|&v| v as u32)
            .collect();
        let (endpoint_bits, _) = encode_sequence(&endpoints, self.endpoint_range);
        let mut bits = writer.bits | endpoint_bits << writer.pos;

        let weights: Vec<u32> = self.weights[..self.weight_count()]
            .iter()
            .map(|&w| w as u32)
            .collect();
        let (weight_bits, weight_len) = encode_sequence(&weights, self.weight_range);
        bits |= weight_bits.reverse_bits();

        if self.dual_plane {
            bits |= (self.color_component_selector as u128) << (128 - weight_len - 2);
        }

        bits.to_le_bytes()
    }
}

/// Endpoints of one partition before quantization.
#[derive(Copy, Clone, Debug, Default)]
struct LineFit {
    low: [f32; 4],
    high: [f32; 4],
    residual: f32,
}

/// Fits a line through the texels of `partition` with principal component analysis.
fn fit_line(
    texels: &BlockTexels,
    assignment: &[u8; MAX_TEXELS],
    partition: u8,
    channel_weights: [f32; 4],
) -> LineFit {
    let scale = channel_weights.map(f32::sqrt);

    let mut mean = [0.0f32; 4];
    let mut count = 0.0;
    for k in 0..texels.count() {
        if assignment[k] != partition {
            continue;
        }
        for c in 0..4 {
            mean[c] += texels.colors[k][c] * scale[c];
        }
        count += 1.0;
    }
    if count == 0.0 {
        return LineFit::default();
    }
    mean = mean.map(|m| m / count);

    let mut covariance = [[0.0f32; 4]; 4];
    for k in 0..texels.count() {
        if assignment[k] != partition {
            continue;
        }
        let mut d = [0.0; 4];
        for c in 0..4 {
            d[c] = texels.colors[k][c] * scale[c] - mean[c];
        }
        for i in 0..4 {
            for j in 0..4 {
                covariance[i][j] += d[i] * d[j];
            }
        }
    }

    let mut axis = scale;
    for _ in 0..POWER_ITERATIONS {
        let mut next = [0.0; 4];
        for i in 0..4 {
            for j in 0..4 {
                next[i] += covariance[i][j] * axis[j];
            }
        }
        let length = next.iter().map(|v| v * v).sum::<f32>().sqrt();
        if length < 1e-6 {
            axis = [0.0; 4];
            break;
        }
        axis = next.map(|v| v / length);
    }

    let mut t_min = f32::MAX;
    let mut t_max = f32::MIN;
    let mut residual = 0.0;
    for k in 0..texels.count() {
        if assignment[k] != partition {
            continue;
        }
        let mut d = [0.0; 4];
        for c in 0..4 {
            d[c] = texels.colors[k][c] * scale[c] - mean[c];
        }
        let t: f32 = (0..4).map(|c| d[c] * axis[c]).sum();
        t_min = t_min.min(t);
        t_max = t_max.max(t);
        residual += (0..4).map(|c| (d[c] - axis[c] * t).powi(2)).sum::<f32>();
    }

    let mut fit = LineFit {
        residual,
        ..Default::default()
    };
    for c in 0..4 {
        let (low, high) = if scale[c] > 0.0 {
            (
                (mean[c] + axis[c] * t_min) / scale[c],
                (mean[c] + axis[c] * t_max) / scale[c],
            )
        } else {
            let plain = mean[c];
            (plain, plain)
        };
        fit.low[c] = low.clamp(0.0, 255.0);
        fit.high[c] = high.clamp(0.0, 255.0);
    }
    fit
}

/// Quantizes the endpoints of one partition. Returns the ISE values and the decoded colors.
///
/// RGB endpoints are ordered so that decoders never apply blue contraction.
fn quantize_endpoints(
    mode: EndpointMode,
    low: [f32; 4],
    high: [f32; 4],
    range: usize,
) -> ([u8; 8], [u8; 4], [u8; 4]) {
    let tables = ColorTables::get();
    let quantize = |v: f32| tables.quantize(range, v.round() as u8);
    let unquantize = |i: u8| tables.unquantize(range, i);

    let mut values = [0u8; 8];
    match mode {
        EndpointMode::LuminanceAlpha => {
            values[..4].copy_from_slice(&[
                quantize(low[0]),
                quantize(high[0]),
                quantize(low[3]),
                quantize(high[3]),
            ]);
            let l0 = unquantize(values[0]);
            let l1 = unquantize(values[1]);
            let a0 = unquantize(values[2]);
            let a1 = unquantize(values[3]);
            (values, [l0, l0, l0, a0], [l1, l1, l1, a1])
        }
        EndpointMode::Rgb | EndpointMode::Rgba => {
            let channels = if mode == EndpointMode::Rgba { 4 } else { 3 };
            for c in 0..channels {
                values[c * 2] = quantize(low[c]);
                values[c * 2 + 1] = quantize(high[c]);
            }

            let sum = |offset: usize| -> u32 {
                (0..3)
                    .map(|c| unquantize(values[c * 2 + offset]) as u32)
                    .sum()
            };
            if sum(1) < sum(0) {
                for c in 0..channels {
                    values.swap(c * 2, c * 2 + 1);
                }
            }

            let mut e0 = [255u8; 4];
            let mut e1 = [255u8; 4];
            for c in 0..channels {
                e0[c] = unquantize(values[c * 2]);
                e1[c] = unquantize(values[c * 2 + 1]);
            }
            (values, e0, e1)
        }
    }
}

/// Interpolates one decoded channel the way an LDR decoder does.
pub(crate) fn interpolate(e0: u8, e1: u8, weight: u32, srgb: bool) -> u8 {
    let expand = |c: u8| {
        if srgb {
            (c as u32) << 8 | 0x80
        } else {
            c as u32 * 257
        }
    };
    let c = (expand(e0) * (64 - weight) + expand(e1) * weight + 32) >> 6;
    (c >> 8) as u8
}

struct Candidate {
    error: f32,
    block: PackedBlock,
}

/// Encodes a single block.
pub(crate) struct BlockEncoder<'a> {
    profile: &'a Profile,
    texels: &'a BlockTexels,
    infill: [([u32; 4], [u32; 4]); MAX_TEXELS],
}

impl<'a> BlockEncoder<'a> {
    pub(crate) fn new(profile: &'a Profile, texels: &'a BlockTexels) -> Self {
        Self {
            profile,
            texels,
            infill: [([0; 4], [0; 4]); MAX_TEXELS],
        }
    }

    pub(crate) fn encode(&mut self) -> [u8; 16] {
        if let Some(color) = self.texels.uniform_color() {
            return void_extent_block(color);
        }
        self.encode_general()
    }

    /// Runs the mode search without the constant color shortcut.
    pub(crate) fn encode_general(&mut self) -> [u8; 16] {
        let mut best: Option<Candidate> = None;
        let mut best_single_error = f32::MAX;

        for &shape in mode_shapes(self.profile.footprint) {
            if shape.dual_plane && !self.profile.dual_plane {
                continue;
            }
            self.prepare_infill(shape);

            let candidate = if shape.partitions == 1 {
                let assignment = [0u8; MAX_TEXELS];
                self.search_weight_ranges(shape, &assignment, 0)
            } else {
                let Some((seed, assignment)) = self.select_partition_seed() else {
                    continue;
                };
                self.search_weight_ranges(shape, &assignment, seed)
            };

            let Some(candidate) = candidate else {
                continue;
            };

            // Two partitions must be strictly better than any single partition mode.
            if shape.partitions > 1 && candidate.error >= best_single_error {
                continue;
            }
            if shape.partitions == 1 {
                best_single_error = best_single_error.min(candidate.error);
            }
            if best.as_ref().is_none_or(|b| candidate.error < b.error) {
                best = Some(candidate);
            }
        }

        match best {
            Some(candidate) => candidate.block.pack(),
            None => void_extent_block(self.average_color()),
        }
    }

    fn average_color(&self) -> [u8; 4] {
        let count = self.texels.count() as f32;
        let mut sum = [0.0f32; 4];
        for color in &self.texels.colors[..self.texels.count()] {
            for c in 0..4 {
                sum[c] += color[c];
            }
        }
        sum.map(|s| (s / count).round() as u8)
    }

    fn prepare_infill(&mut self, shape: ModeShape) {
        for t in 0..self.texels.height {
            for s in 0..self.texels.width {
                self.infill[(t * self.texels.width + s) as usize] = infill_weights(
                    self.texels.width,
                    self.texels.height,
                    shape.grid_width,
                    shape.grid_height,
                    s,
                    t,
                );
            }
        }
    }

    /// Picks the two partition seed whose partitions are best described by a line each.
    fn select_partition_seed(&self) -> Option<(u32, [u8; MAX_TEXELS])> {
        let small_block = self.texels.count() < 31;
        let mut best: Option<(f32, u32, [u8; MAX_TEXELS])> = None;

        for seed in 0..PARTITION_SEEDS {
            let mut assignment = [0u8; MAX_TEXELS];
            let mut counts = [0; 2];
            for y in 0..self.texels.height {
                for x in 0..self.texels.width {
                    let p = select_partition(seed, x, y, 2, small_block);
                    assignment[(y * self.texels.width + x) as usize] = p as u8;
                    counts[p as usize] += 1;
                }
            }
            if counts.contains(&0) {
                continue;
            }

            let weights = self.profile.channel_weights;
            let residual = fit_line(self.texels, &assignment, 0, weights).residual
                + fit_line(self.texels, &assignment, 1, weights).residual;

            if best.as_ref().is_none_or(|(r, _, _)| residual < *r) {
                best = Some((residual, seed, assignment));
            }
        }

        best.map(|(_, seed, assignment)| (seed, assignment))
    }

    fn search_weight_ranges(
        &self,
        shape: ModeShape,
        assignment: &[u8; MAX_TEXELS],
        seed: u32,
    ) -> Option<Candidate> {
        let mut plane_weights = self.profile.channel_weights;
        if shape.dual_plane {
            plane_weights[3] = 0.0;
        }

        let mut fits = [LineFit::default(); 2];
        for p in 0..shape.partitions as usize {
            fits[p] = fit_line(self.texels, assignment, p as u8, plane_weights);
            if shape.dual_plane {
                let alpha = fit_line(self.texels, assignment, p as u8, [0.0, 0.0, 0.0, 1.0]);
                fits[p].low[3] = alpha.low[3];
                fits[p].high[3] = alpha.high[3];
            }
        }

        let mut best: Option<Candidate> = None;
        for &weight_range in WEIGHT_RANGES.iter() {
            let Some(candidate) = self.evaluate(shape, assignment, seed, &fits, weight_range)
            else {
                continue;
            };
            if best.as_ref().is_none_or(|b| candidate.error < b.error) {
                best = Some(candidate);
            }
        }
        best
    }

    fn evaluate(
        &self,
        shape: ModeShape,
        assignment: &[u8; MAX_TEXELS],
        seed: u32,
        fits: &[LineFit; 2],
        weight_range: usize,
    ) -> Option<Candidate> {
        let mode = self.profile.endpoint_mode;
        let planes = if shape.dual_plane { 2 } else { 1 };
        let grid_points = (shape.grid_width * shape.grid_height) as usize;
        let weight_count = grid_points * planes;
        if weight_count > MAX_WEIGHTS {
            return None;
        }

        let weight_bits = sequence_bits(weight_count as u32, weight_range);
        if !(24..=96).contains(&weight_bits) {
            return None;
        }
        encode_block_mode(
            shape.grid_width,
            shape.grid_height,
            shape.dual_plane,
            weight_range,
        )?;

        let config_bits = 13
            + if shape.partitions == 1 { 4 } else { 16 }
            + if shape.dual_plane { 2 } else { 0 };
        let value_count = (mode.value_count() * shape.partitions as usize) as u32;
        let endpoint_range =
            endpoint_range_for_bits(value_count, 128 - config_bits - weight_bits as i32)?;

        let mut endpoints = [0u8; 16];
        let mut decoded = [[[0u8; 4]; 2]; 2];
        for p in 0..shape.partitions as usize {
            let (values, e0, e1) =
                quantize_endpoints(mode, fits[p].low, fits[p].high, endpoint_range);
            let n = mode.value_count();
            endpoints[p * n..(p + 1) * n].copy_from_slice(&values[..n]);
            decoded[p] = [e0, e1];
        }

        // Ideal weight of every texel on its decoded endpoint line.
        let texel_count = self.texels.count();
        let mut ideal = [[0.0f32; MAX_TEXELS]; 2];
        for plane in 0..planes {
            let mut weights = self.profile.channel_weights;
            if shape.dual_plane {
                if plane == 0 {
                    weights[3] = 0.0;
                } else {
                    weights = [0.0, 0.0, 0.0, 1.0];
                }
            }
            for k in 0..texel_count {
                let [e0, e1] = decoded[assignment[k] as usize];
                let mut num = 0.0;
                let mut den = 0.0;
                for c in 0..4 {
                    let d = e1[c] as f32 - e0[c] as f32;
                    num += (self.texels.colors[k][c] - e0[c] as f32) * d * weights[c];
                    den += d * d * weights[c];
                }
                ideal[plane][k] = if den > 0.0 {
                    (num / den).clamp(0.0, 1.0) * 64.0
                } else {
                    0.0
                };
            }
        }

        // Decimate onto the weight grid and quantize.
        let mut weights = [0u8; MAX_WEIGHTS];
        let mut unquantized = [[0u32; MAX_WEIGHTS]; 2];
        for plane in 0..planes {
            let mut sum = [0.0f32; MAX_WEIGHTS];
            let mut total = [0.0f32; MAX_WEIGHTS];
            for k in 0..texel_count {
                let (indices, factors) = self.infill[k];
                for i in 0..4 {
                    if factors[i] > 0 {
                        sum[indices[i] as usize] += factors[i] as f32 * ideal[plane][k];
                        total[indices[i] as usize] += factors[i] as f32;
                    }
                }
            }
            for g in 0..grid_points {
                let target = if total[g] > 0.0 { sum[g] / total[g] } else { 0.0 };
                let q = quantize_weight(weight_range, target);
                weights[g * planes + plane] = q as u8;
                unquantized[plane][g] = unquantize_weight(weight_range, q);
            }
        }

        let mut error = 0.0;
        for k in 0..texel_count {
            let (indices, factors) = self.infill[k];
            let mut texel_weights = [0u32; 2];
            for plane in 0..planes {
                let sum: u32 = (0..4)
                    .filter(|&i| factors[i] > 0)
                    .map(|i| unquantized[plane][indices[i] as usize] * factors[i])
                    .sum();
                texel_weights[plane] = (sum + 8) >> 4;
            }

            let [e0, e1] = decoded[assignment[k] as usize];
            for c in 0..4 {
                let plane = if shape.dual_plane && c == 3 { 1 } else { 0 };
                let value = interpolate(e0[c], e1[c], texel_weights[plane], self.profile.srgb);
                let diff = value as f32 - self.texels.colors[k][c];
                error += diff * diff * self.texels.weights[k][c];
            }
        }

        Some(Candidate {
            error,
            block: PackedBlock {
                grid_width: shape.grid_width,
                grid_height: shape.grid_height,
                dual_plane: shape.dual_plane,
                weight_range,
                weights,
                color_component_selector: 3,
                partitions: shape.partitions,
                partition_seed: seed,
                endpoint_mode: mode,
                endpoint_range,
                endpoints,
            },
        })
    }
}

/// Encodes the block at (`bx`, `by`) of an RGBA8 image.
pub(crate) fn encode_block(
    profile: &Profile,
    rgba_data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    bx: u32,
    by: u32,
) -> [u8; 16] {
    let texels = BlockTexels::load(profile, rgba_data, width, height, stride, bx, by);
    BlockEncoder::new(profile, &texels).encode()
}
