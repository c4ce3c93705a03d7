//! Bit-reversal (TIMBIR) interlacing.
//!
//! Time step `n` belongs to loop `(n*K / N) mod K`. The loop index is
//! bit-reversed and added to `n*K`; the result modulo `N` picks the angle on
//! a `360/N` grid. Consecutive loops therefore land between each other's
//! samples instead of next to them.
//!
//! For `K` that is not a power of two the reversal runs over `ceil(log2 K)`
//! bits and the reversed values are re-ranked into `[0, K)`.
//!
//! When `N` is not a multiple of `K` the loops overlap on the grid and some
//! angles repeat. The sequence still has `N` acquisitions; the repeat is
//! logged at warn level with the number of distinct angles.

use tracing::{debug, warn};

use super::{Acquisition, AngleSequence, Interlace, InterlaceMethod, SequenceParams};
use crate::error::PsoResult;

/// Reverse the lowest `bits` bits of `value`.
pub fn bit_reverse(value: usize, bits: u32) -> usize {
    if bits == 0 {
        return 0;
    }
    value.reverse_bits() >> (usize::BITS - bits)
}

/// Number of bits needed to index `k` values (`ceil(log2 k)`).
fn index_bits(k: usize) -> u32 {
    if k <= 1 {
        0
    } else {
        usize::BITS - (k - 1).leading_zeros()
    }
}

/// Bit-reversal permutation of `[0, k)` valid for any `k`.
///
/// Entry `x` is the rank of `bit_reverse(x)` among all reversed values, so the
/// result is always a permutation. For powers of two it equals the plain
/// bit-reversal permutation.
pub fn generalized_bit_reversal(k: usize) -> Vec<usize> {
    let bits = index_bits(k);
    let raw: Vec<usize> = (0..k).map(|x| bit_reverse(x, bits)).collect();

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by_key(|&i| raw[i]);

    let mut ranks = vec![0; k];
    for (rank, &idx) in order.iter().enumerate() {
        ranks[idx] = rank;
    }
    ranks
}

/// Bit-reversal interlacing policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitReversal;

impl Interlace for BitReversal {
    fn generate(&self, params: &SequenceParams) -> PsoResult<AngleSequence> {
        params.validate()?;

        let n_total = params.num_angles;
        let k = params.loops;
        let perm = generalized_bit_reversal(k);
        let grid = 360.0 / n_total as f64;

        let mut slots = Vec::with_capacity(n_total);
        let acquisitions: Vec<Acquisition> = (0..n_total)
            .map(|n| {
                let loop_id = (n * k / n_total) % k;
                let slot = (n * k + perm[loop_id]) % n_total;
                slots.push(slot);
                Acquisition {
                    angle: params.wrap.apply(slot as f64 * grid),
                    loop_id,
                }
            })
            .collect();

        slots.sort_unstable();
        slots.dedup();
        if slots.len() < n_total {
            warn!(
                num_angles = n_total,
                loops = k,
                distinct = slots.len(),
                "Bit-reversal sequence repeats grid angles"
            );
        }

        debug!(
            num_angles = n_total,
            loops = k,
            permutation = ?perm,
            "Generated bit-reversal sequence"
        );

        Ok(AngleSequence::new(
            InterlaceMethod::Timbir,
            k,
            params.wrap.period(),
            acquisitions,
        ))
    }
}
