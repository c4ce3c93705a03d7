//! Round-robin interlacing: `N` equally spaced angles, loop `i mod K`.
//!
//! Acquisition follows angle order, so this is the plain fly scan with loop
//! tags attached. It serves as the reference the other policies are
//! compared against.

use super::{Acquisition, AngleSequence, Interlace, InterlaceMethod, SequenceParams};
use crate::error::PsoResult;

/// Round-robin interlacing policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl Interlace for RoundRobin {
    fn generate(&self, params: &SequenceParams) -> PsoResult<AngleSequence> {
        params.validate()?;

        let step = params.span / params.num_angles as f64;
        let acquisitions = (0..params.num_angles)
            .map(|i| Acquisition {
                angle: params.start + i as f64 * step,
                loop_id: i % params.loops,
            })
            .collect();

        Ok(AngleSequence::new(
            InterlaceMethod::RoundRobin,
            params.loops,
            params.span,
            acquisitions,
        ))
    }
}
