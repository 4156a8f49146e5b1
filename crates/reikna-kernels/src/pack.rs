//! Operand packing for the blocked GEMM micro-kernels.
//!
//! Both GEMM operands are rearranged before the inner loop so every load in
//! the hot path is contiguous:
//!
//! - the RHS (`B`, `[k, n]`) is cut into column tiles of width `W`; inside a
//!   tile, rows follow each other with the `W` column values adjacent, so
//!   element `(r, c)` lands at `tile(c/W)*k*W + r*W + (c % W)`. A column
//!   tail smaller than `W` becomes one narrower tile using the same formula.
//! - the LHS (`A`, `[m, k]`, the kernel/weight side) is cut into row blocks
//!   of 8/4/2/1 rows, each block stored column-major so the block's rows are
//!   adjacent per K step.
//!
//! The int8 variants additionally interleave K in groups of four (the
//! dot-product accumulation layout), zero-padding the K tail.
//! Packing is a pure permutation: `unpack_*` restores the source
//! bit-for-bit, which the round-trip tests pin down.
//!
//! Callers validate operand shapes at the operator boundary; packing itself
//! assumes non-empty operands.

/// RHS packed into column tiles.
#[derive(Debug, Clone)]
pub struct PackedB<T> {
    pub data: Vec<T>,
    pub k: usize,
    pub n: usize,
    pub width: usize,
}

impl<T> PackedB<T> {
    pub fn tile_count(&self) -> usize {
        self.n.div_ceil(self.width)
    }

    /// Returns `(first_col, tile_width, tile_data)` for tile `t`.
    pub fn tile(&self, t: usize) -> (usize, usize, &[T]) {
        let col0 = t * self.width;
        let w = self.width.min(self.n - col0);
        let base = col0 * self.k;
        (col0, w, &self.data[base..base + self.k * w])
    }
}

fn pack_b_with<T: Copy>(
    k: usize,
    n: usize,
    width: usize,
    get: impl Fn(usize, usize) -> T,
) -> PackedB<T> {
    debug_assert!(k > 0 && n > 0 && width > 0);
    let mut data = Vec::with_capacity(k * n);
    let mut col0 = 0;
    while col0 < n {
        let w = width.min(n - col0);
        for r in 0..k {
            for j in 0..w {
                data.push(get(r, col0 + j));
            }
        }
        col0 += w;
    }
    PackedB { data, k, n, width }
}

/// Packs a row-major `[k, n]` matrix.
pub fn pack_b<T: Copy>(src: &[T], k: usize, n: usize, width: usize) -> PackedB<T> {
    pack_b_with(k, n, width, |r, c| src[r * n + c])
}

/// Packs the transpose of a row-major `[n, k]` matrix (e.g. an
/// `[out, in]` weight consumed as `B[in, out]`).
pub fn pack_b_transposed<T: Copy>(src: &[T], k: usize, n: usize, width: usize) -> PackedB<T> {
    pack_b_with(k, n, width, |r, c| src[c * k + r])
}

/// Restores the row-major `[k, n]` source of a packed RHS.
pub fn unpack_b<T: Copy + Default>(packed: &PackedB<T>) -> Vec<T> {
    let mut out = vec![T::default(); packed.k * packed.n];
    for t in 0..packed.tile_count() {
        let (col0, w, tile) = packed.tile(t);
        for r in 0..packed.k {
            for j in 0..w {
                out[r * packed.n + col0 + j] = tile[r * w + j];
            }
        }
    }
    out
}

/// RHS packed into column tiles with K interleaved in groups of four.
///
/// Tile layout is `[k_group][col][4]`; K positions past the end contribute
/// zeros, which keeps the integer accumulation exact.
#[derive(Debug, Clone)]
pub struct PackedBInt8 {
    pub data: Vec<i8>,
    pub k: usize,
    pub k_groups: usize,
    pub n: usize,
    pub width: usize,
}

impl PackedBInt8 {
    pub fn tile_count(&self) -> usize {
        self.n.div_ceil(self.width)
    }

    pub fn tile(&self, t: usize) -> (usize, usize, &[i8]) {
        let col0 = t * self.width;
        let w = self.width.min(self.n - col0);
        let base = col0 * self.k_groups * 4;
        (col0, w, &self.data[base..base + self.k_groups * 4 * w])
    }
}

fn pack_b_int8_with(
    k: usize,
    n: usize,
    width: usize,
    get: impl Fn(usize, usize) -> i8,
) -> PackedBInt8 {
    debug_assert!(k > 0 && n > 0 && width > 0);
    let k_groups = k.div_ceil(4);
    let mut data = Vec::with_capacity(k_groups * 4 * n);
    let mut col0 = 0;
    while col0 < n {
        let w = width.min(n - col0);
        for g in 0..k_groups {
            for j in 0..w {
                for l in 0..4 {
                    let r = g * 4 + l;
                    data.push(if r < k { get(r, col0 + j) } else { 0 });
                }
            }
        }
        col0 += w;
    }
    PackedBInt8 {
        data,
        k,
        k_groups,
        n,
        width,
    }
}

pub fn pack_b_int8(src: &[i8], k: usize, n: usize, width: usize) -> PackedBInt8 {
    pack_b_int8_with(k, n, width, |r, c| src[r * n + c])
}

pub fn pack_b_int8_transposed(src: &[i8], k: usize, n: usize, width: usize) -> PackedBInt8 {
    pack_b_int8_with(k, n, width, |r, c| src[c * k + r])
}

pub fn unpack_b_int8(packed: &PackedBInt8) -> Vec<i8> {
    let mut out = vec![0i8; packed.k * packed.n];
    for t in 0..packed.tile_count() {
        let (col0, w, tile) = packed.tile(t);
        for g in 0..packed.k_groups {
            for j in 0..w {
                for l in 0..4 {
                    let r = g * 4 + l;
                    if r < packed.k {
                        out[r * packed.n + col0 + j] = tile[(g * w + j) * 4 + l];
                    }
                }
            }
        }
    }
    out
}

/// Greedy row-block split: blocks of `largest` rows first, then halving
/// down to single rows. `largest` must be a power of two.
pub(crate) fn row_blocks(m: usize, largest: usize) -> Vec<(usize, usize)> {
    debug_assert!(largest.is_power_of_two());
    let mut blocks = Vec::new();
    let mut row0 = 0;
    while row0 < m {
        let mut b = largest;
        while b > m - row0 {
            b /= 2;
        }
        blocks.push((row0, b));
        row0 += b;
    }
    blocks
}

/// LHS packed into row blocks, each block column-major.
#[derive(Debug, Clone)]
pub struct PackedA<T> {
    pub data: Vec<T>,
    pub m: usize,
    pub k: usize,
    pub m_block: usize,
}

impl<T> PackedA<T> {
    /// `(row0, rows, block_data)` per block, in row order.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, usize, &[T])> {
        let mut offset = 0;
        row_blocks(self.m, self.m_block).into_iter().map(move |(row0, rows)| {
            let base = offset;
            offset += rows * self.k;
            (row0, rows, &self.data[base..base + rows * self.k])
        })
    }
}

/// Packs a row-major `[m, k]` matrix into greedy row blocks.
pub fn pack_a<T: Copy>(src: &[T], m: usize, k: usize, m_block: usize) -> PackedA<T> {
    debug_assert!(m > 0 && k > 0);
    let mut data = Vec::with_capacity(m * k);
    for (row0, rows) in row_blocks(m, m_block) {
        for c in 0..k {
            for r in 0..rows {
                data.push(src[(row0 + r) * k + c]);
            }
        }
    }
    PackedA {
        data,
        m,
        k,
        m_block,
    }
}

pub fn unpack_a<T: Copy + Default>(packed: &PackedA<T>) -> Vec<T> {
    let mut out = vec![T::default(); packed.m * packed.k];
    for (row0, rows, block) in packed.blocks() {
        for c in 0..packed.k {
            for r in 0..rows {
                out[(row0 + r) * packed.k + c] = block[c * rows + r];
            }
        }
    }
    out
}

/// LHS packed into row blocks with K interleaved in groups of four.
#[derive(Debug, Clone)]
pub struct PackedAInt8 {
    pub data: Vec<i8>,
    pub m: usize,
    pub k: usize,
    pub k_groups: usize,
    pub m_block: usize,
}

impl PackedAInt8 {
    pub fn blocks(&self) -> impl Iterator<Item = (usize, usize, &[i8])> {
        let mut offset = 0;
        row_blocks(self.m, self.m_block).into_iter().map(move |(row0, rows)| {
            let base = offset;
            offset += rows * self.k_groups * 4;
            (row0, rows, &self.data[base..base + rows * self.k_groups * 4])
        })
    }
}

/// Packs a row-major `[m, k]` int8 matrix; block layout is
/// `[k_group][row][4]` with a zero-padded K tail.
pub fn pack_a_int8(src: &[i8], m: usize, k: usize, m_block: usize) -> PackedAInt8 {
    debug_assert!(m > 0 && k > 0);
    let k_groups = k.div_ceil(4);
    let mut data = Vec::with_capacity(m * k_groups * 4);
    for (row0, rows) in row_blocks(m, m_block) {
        for g in 0..k_groups {
            for r in 0..rows {
                for l in 0..4 {
                    let c = g * 4 + l;
                    data.push(if c < k { src[(row0 + r) * k + c] } else { 0 });
                }
            }
        }
    }
    PackedAInt8 {
        data,
        m,
        k,
        k_groups,
        m_block,
    }
}

pub fn unpack_a_int8(packed: &PackedAInt8) -> Vec<i8> {
    let mut out = vec![0i8; packed.m * packed.k];
    for (row0, rows, block) in packed.blocks() {
        for g in 0..packed.k_groups {
            for r in 0..rows {
                for l in 0..4 {
                    let c = g * 4 + l;
                    if c < packed.k {
                        out[(row0 + r) * packed.k + c] = block[(g * rows + r) * 4 + l];
                    }
                }
            }
        }
    }
    out
}
