use std::sync::OnceLock;

/// Number of integer sequence encoding ranges.
pub(crate) const ISE_RANGE_COUNT: usize = 21;

/// Lowest endpoint range a legal block may use (0..5).
pub(crate) const MIN_ENDPOINT_RANGE: usize = 4;

/// Integer sequence encoding ranges as `[levels, bits, trits, quints]`.
pub(crate) const ISE_RANGES: [[u32; 4]; ISE_RANGE_COUNT] = [
    [2, 1, 0, 0],
    [3, 0, 1, 0],
    [4, 2, 0, 0],
    [5, 0, 0, 1],
    [6, 1, 1, 0],
    [8, 3, 0, 0],
    [10, 1, 0, 1],
    [12, 2, 1, 0],
    [16, 4, 0, 0],
    [20, 2, 0, 1],
    [24, 3, 1, 0],
    [32, 5, 0, 0],
    [40, 3, 0, 1],
    [48, 4, 1, 0],
    [64, 6, 0, 0],
    [80, 4, 0, 1],
    [96, 5, 1, 0],
    [128, 7, 0, 0],
    [160, 5, 0, 1],
    [192, 6, 1, 0],
    [256, 8, 0, 0],
];

/// Weight ranges the encoder searches. Only pure bit ranges, indexed into [`ISE_RANGES`].
pub(crate) const WEIGHT_RANGES: [usize; 5] = [0, 2, 5, 8, 11];

pub(crate) const fn range_levels(range: usize) -> u32 {
    ISE_RANGES[range][0]
}

/// Bits used by `count` values of the given range.
pub(crate) const fn sequence_bits(count: u32, range: usize) -> u32 {
    let [_, bits, trits, quints] = ISE_RANGES[range];
    count * bits + (count * 8 * trits + 4) / 5 + (count * 7 * quints + 2) / 3
}

/// Highest endpoint range whose sequence fits into `available_bits`.
///
/// Decoders derive the range the same way, so it is not a free choice of the encoder.
pub(crate) fn endpoint_range_for_bits(value_count: u32, available_bits: i32) -> Option<usize> {
    if available_bits <= 0 {
        return None;
    }
    (MIN_ENDPOINT_RANGE..ISE_RANGE_COUNT)
        .rev()
        .find(|&range| sequence_bits(value_count, range) as i32 <= available_bits)
}

/// Replicates an `n` bit value to fill `target` bits.
pub(crate) const fn replicate_bits(value: u32, n: u32, target: u32) -> u32 {
    let mut result = 0;
    let mut shift = target as i32;
    while shift > 0 {
        shift -= n as i32;
        if shift >= 0 {
            result |= value << shift;
        } else {
            result |= value >> -shift;
        }
    }
    result
}

/// Unquantizes a color endpoint value of the given range to 0..=255.
pub(crate) fn unquantize_color(range: usize, value: u32) -> u8 {
    let [_, n, trits, quints] = ISE_RANGES[range];
    if trits == 0 && quints == 0 {
        return replicate_bits(value, n, 8) as u8;
    }

    let d = value >> n;
    let m = value & ((1 << n) - 1);
    let a = if m & 1 != 0 { 0x1FF } else { 0 };
    let b = (m >> 1) & 1;
    let c = (m >> 2) & 1;
    let dd = (m >> 3) & 1;
    let e = (m >> 4) & 1;
    let f = (m >> 5) & 1;

    let (big_b, big_c) = match range {
        4 => (0, 204),
        6 => (0, 113),
        7 => ((b << 8) | (b << 4) | (b << 2) | (b << 1), 93),
        9 => ((b << 8) | (b << 3) | (b << 2), 54),
        10 => ((c << 8) | (b << 7) | (c << 3) | (b << 2) | (c << 1) | b, 44),
        12 => ((c << 8) | (b << 7) | (c << 2) | (b << 1) | c, 26),
        13 => ((dd << 8) | (c << 7) | (b << 6) | (dd << 2) | (c << 1) | b, 22),
        15 => ((dd << 8) | (c << 7) | (b << 6) | (dd << 1) | c, 13),
        16 => ((e << 8) | (dd << 7) | (c << 6) | (b << 5) | (e << 1) | dd, 11),
        18 => ((e << 8) | (dd << 7) | (c << 6) | (b << 5) | e, 6),
        19 => ((f << 8) | (e << 7) | (dd << 6) | (c << 5) | (b << 4) | f, 5),
        // The 3 and 5 level ranges are below the legal endpoint range.
        _ => return (value * 255 / (range_levels(range) - 1)) as u8,
    };

    let mut t = d * big_c + big_b;
    t ^= a;
    ((a & 0x80) | (t >> 2)) as u8
}

/// Unquantizes a weight of a pure bit range to 0..=64.
pub(crate) const fn unquantize_weight(range: usize, value: u32) -> u32 {
    let bits = ISE_RANGES[range][1];
    let v = replicate_bits(value, bits, 6);
    if v > 32 {
        v + 1
    } else {
        v
    }
}

/// Quantizes an ideal weight in 0.0..=64.0 to the closest level of a pure bit range.
pub(crate) fn quantize_weight(range: usize, weight: f32) -> u32 {
    let max = range_levels(range) - 1;
    let guess = (weight * max as f32 / 64.0).round().clamp(0.0, max as f32) as u32;

    let mut best = guess;
    let mut best_diff = f32::MAX;
    for candidate in guess.saturating_sub(1)..=(guess + 1).min(max) {
        let diff = (unquantize_weight(range, candidate) as f32 - weight).abs();
        if diff < best_diff {
            best_diff = diff;
            best = candidate;
        }
    }
    best
}

/// Lookup tables mapping a color value to its closest quantized value for every range.
pub(crate) struct ColorTables {
    quantize: [[u8; 256]; ISE_RANGE_COUNT],
    unquantize: [[u8; 256]; ISE_RANGE_COUNT],
}

impl ColorTables {
    fn build() -> Self {
        let mut quantize = [[0; 256]; ISE_RANGE_COUNT];
        let mut unquantize = [[0; 256]; ISE_RANGE_COUNT];

        for range in 0..ISE_RANGE_COUNT {
            let levels = range_levels(range);
            for index in 0..levels {
                unquantize[range][index as usize] = unquantize_color(range, index);
            }
            for value in 0..256 {
                let mut best = 0;
                let mut best_diff = u32::MAX;
                for index in 0..levels {
                    let diff = (unquantize[range][index as usize] as i32 - value).unsigned_abs();
                    if diff < best_diff {
                        best_diff = diff;
                        best = index;
                    }
                }
                quantize[range][value as usize] = best as u8;
            }
        }

        Self {
            quantize,
            unquantize,
        }
    }

    pub(crate) fn get() -> &'static Self {
        static TABLES: OnceLock<ColorTables> = OnceLock::new();
        TABLES.get_or_init(Self::build)
    }

    pub(crate) fn quantize(&self, range: usize, value: u8) -> u8 {
        self.quantize[range][value as usize]
    }

    pub(crate) fn unquantize(&self, range: usize, index: u8) -> u8 {
        self.unquantize[range][index as usize]
    }

    /// Packs both tables for the shader: the low byte of entry `range * 256 + i` is the
    /// quantized index of color `i`, the second byte is the color of quantized index `i`.
    #[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
    pub(crate) fn packed(&self) -> Vec<u32> {
        (0..ISE_RANGE_COUNT)
            .flat_map(|range| {
                (0..256).map(move |i| {
                    self.quantize[range][i] as u32 | (self.unquantize[range][i] as u32) << 8
                })
            })
            .collect()
    }
}

/// Little endian bit writer over a 128 bit block.
#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct BitWriter {
    pub(crate) bits: u128,
    pub(crate) pos: u32,
}

impl BitWriter {
    pub(crate) fn put(&mut self, count: u32, value: u32) {
        let masked = value as u128 & ((1u128 << count) - 1);
        self.bits |= masked.checked_shl(self.pos).unwrap_or(0);
        self.pos += count;
    }
}

fn pack_five_trits(writer: &mut BitWriter, values: &[u32; 5], n: u32) {
    let mut t = [0; 5];
    let mut m = [0; 5];
    for i in 0..5 {
        t[i] = values[i] >> n;
        m[i] = values[i] & ((1 << n) - 1);
    }

    let c = if t[1] == 2 && t[2] == 2 {
        3 * 4 + t[0]
    } else if t[2] == 2 {
        t[1] * 16 + t[0] * 4 + 3
    } else {
        t[2] * 16 + t[1] * 4 + t[0]
    };

    let packed = if t[3] == 2 && t[4] == 2 {
        ((c >> 2) & 7) << 5 | 7 << 2 | (c & 3)
    } else if t[4] == 2 {
        (c & 31) | t[3] << 7 | 3 << 5
    } else {
        (c & 31) | t[4] << 7 | t[3] << 5
    };

    writer.put(n, m[0]);
    writer.put(2, packed & 3);
    writer.put(n, m[1]);
    writer.put(2, (packed >> 2) & 3);
    writer.put(n, m[2]);
    writer.put(1, (packed >> 4) & 1);
    writer.put(n, m[3]);
    writer.put(2, (packed >> 5) & 3);
    writer.put(n, m[4]);
    writer.put(1, (packed >> 7) & 1);
}

fn pack_three_quints(writer: &mut BitWriter, values: &[u32; 3], n: u32) {
    let mut q = [0; 3];
    let mut m = [0; 3];
    for i in 0..3 {
        q[i] = values[i] >> n;
        m[i] = values[i] & ((1 << n) - 1);
    }

    let packed = if q[0] == 4 && q[1] == 4 {
        (q[2] & 3) << 3 | 3 << 1 | (q[2] >> 2) & 1
    } else {
        let c = if q[1] == 4 {
            (q[0] << 3) | 5
        } else {
            (q[1] << 3) | q[0]
        };
        if q[2] == 4 {
            ((!c >> 1) & 3) << 5 | ((c >> 3) & 3) << 3 | 3 << 1 | (c & 1)
        } else {
            q[2] << 5 | (c & 31)
        }
    };

    writer.put(n, m[0]);
    writer.put(3, packed & 7);
    writer.put(n, m[1]);
    writer.put(2, (packed >> 3) & 3);
    writer.put(n, m[2]);
    writer.put(2, (packed >> 5) & 3);
}

/// Encodes `values` with the integer sequence encoding of `range`.
///
/// Returns the bits starting at bit 0 and the number of valid bits.
pub(crate) fn encode_sequence(values: &[u32], range: usize) -> (u128, u32) {
    let [_, n, trits, quints] = ISE_RANGES[range];
    let mut writer = BitWriter::default();

    if trits == 1 {
        for chunk in values.chunks(5) {
            let mut group = [0; 5];
            group[..chunk.len()].copy_from_slice(chunk);
            pack_five_trits(&mut writer, &group, n);
        }
    } else if quints == 1 {
        for chunk in values.chunks(3) {
            let mut group = [0; 3];
            group[..chunk.len()].copy_from_slice(chunk);
            pack_three_quints(&mut writer, &group, n);
        }
    } else {
        for &value in values {
            writer.put(n, value);
        }
    }

    let bits = sequence_bits(values.len() as u32, range);
    (writer.bits & ((1u128 << bits) - 1), bits)
}

/// Hashes the partition seed, see the ASTC partition pattern generation.
const fn hash52(mut p: u32) -> u32 {
    p ^= p >> 15;
    p = p.wrapping_sub(p << 17);
    p = p.wrapping_add(p << 7);
    p = p.wrapping_add(p << 4);
    p ^= p >> 5;
    p = p.wrapping_add(p << 16);
    p ^= p >> 7;
    p ^= p >> 3;
    p ^= p << 6;
    p ^= p >> 17;
    p
}

/// Returns the partition of texel (`x`, `y`) for the given seed and partition count.
pub(crate) const fn select_partition(
    seed: u32,
    mut x: u32,
    mut y: u32,
    partition_count: u32,
    small_block: bool,
) -> u32 {
    if small_block {
        x <<= 1;
        y <<= 1;
    }

    let seed = seed + (partition_count - 1) * 1024;
    let rnum = hash52(seed);

    // z is always zero for 2D blocks, so only the first eight seeds contribute.
    let mut s = [
        rnum & 0xF,
        (rnum >> 4) & 0xF,
        (rnum >> 8) & 0xF,
        (rnum >> 12) & 0xF,
        (rnum >> 16) & 0xF,
        (rnum >> 20) & 0xF,
        (rnum >> 24) & 0xF,
        (rnum >> 28) & 0xF,
    ];

    let mut i = 0;
    while i < 8 {
        s[i] *= s[i];
        i += 1;
    }

    let (sh1, sh2) = if seed & 1 != 0 {
        (
            if seed & 2 != 0 { 4 } else { 5 },
            if partition_count == 3 { 6 } else { 5 },
        )
    } else {
        (
            if partition_count == 3 { 6 } else { 5 },
            if seed & 2 != 0 { 4 } else { 5 },
        )
    };

    let a = ((s[0] >> sh1) * x + (s[1] >> sh2) * y + (rnum >> 14)) & 0x3F;
    let b = ((s[2] >> sh1) * x + (s[3] >> sh2) * y + (rnum >> 10)) & 0x3F;
    let mut c = ((s[4] >> sh1) * x + (s[5] >> sh2) * y + (rnum >> 6)) & 0x3F;
    let mut d = ((s[6] >> sh1) * x + (s[7] >> sh2) * y + (rnum >> 2)) & 0x3F;

    if partition_count < 4 {
        d = 0;
    }
    if partition_count < 3 {
        c = 0;
    }

    if a >= b && a >= c && a >= d {
        0
    } else if b >= c && b >= d {
        1
    } else if c >= d {
        2
    } else {
        3
    }
}

/// Encodes the 11 bit block mode of a 2D block. Returns `None` if no layout can express
/// the weight grid.
pub(crate) fn encode_block_mode(
    grid_width: u32,
    grid_height: u32,
    dual_plane: bool,
    weight_range: usize,
) -> Option<u32> {
    if weight_range >= 12 {
        return None;
    }

    let h = (weight_range >= 6) as u32;
    let r = weight_range as u32 + 2 - if h == 1 { 6 } else { 0 };
    let r0 = r & 1;
    let r21 = r >> 1;
    let d = dual_plane as u32;
    let fits = |value: u32, low: u32, bits: u32| value >= low && value - low < (1 << bits);

    let high = d << 10 | h << 9 | r0 << 4;

    if fits(grid_width, 4, 2) && fits(grid_height, 2, 2) {
        let (b, a) = (grid_width - 4, grid_height - 2);
        return Some(high | b << 7 | a << 5 | r21);
    }
    if fits(grid_width, 8, 2) && fits(grid_height, 2, 2) {
        let (b, a) = (grid_width - 8, grid_height - 2);
        return Some(high | b << 7 | a << 5 | 1 << 2 | r21);
    }
    if fits(grid_width, 2, 2) && fits(grid_height, 8, 2) {
        let (a, b) = (grid_width - 2, grid_height - 8);
        return Some(high | b << 7 | a << 5 | 2 << 2 | r21);
    }
    if fits(grid_width, 2, 2) && fits(grid_height, 6, 1) {
        let (a, b) = (grid_width - 2, grid_height - 6);
        return Some(high | b << 7 | a << 5 | 3 << 2 | r21);
    }
    if fits(grid_width, 2, 1) && fits(grid_height, 2, 2) {
        let (b, a) = (grid_width - 2, grid_height - 2);
        return Some(high | 1 << 8 | b << 7 | a << 5 | 3 << 2 | r21);
    }
    if d == 0 && h == 0 && fits(grid_width, 6, 2) && fits(grid_height, 6, 2) {
        let (a, b) = (grid_width - 6, grid_height - 6);
        return Some(b << 9 | 1 << 8 | a << 5 | r0 << 4 | r21 << 2);
    }

    None
}

/// Bilinear infill of the weight grid: grid indices and factors (sum 16) for one texel.
pub(crate) fn infill_weights(
    block_width: u32,
    block_height: u32,
    grid_width: u32,
    grid_height: u32,
    s: u32,
    t: u32,
) -> ([u32; 4], [u32; 4]) {
    let ds = (1024 + block_width / 2) / (block_width - 1);
    let dt = (1024 + block_height / 2) / (block_height - 1);
    let gs = (ds * s * (grid_width - 1) + 32) >> 6;
    let gt = (dt * t * (grid_height - 1) + 32) >> 6;
    let (js, fs) = (gs >> 4, gs & 0xF);
    let (jt, ft) = (gt >> 4, gt & 0xF);

    let v0 = js + jt * grid_width;
    let w11 = (fs * ft + 8) >> 4;
    let w10 = ft - w11;
    let w01 = fs - w11;
    let w00 = 16 + w11 - fs - ft;

    // Factors are zero wherever an index would leave the grid.
    let last = grid_width * grid_height - 1;
    let clamp = |index: u32| index.min(last);

    (
        [v0, clamp(v0 + 1), clamp(v0 + grid_width), clamp(v0 + grid_width + 1)],
        [w00, w01, w10, w11],
    )
}
