//! Temporal resampling of a frame sequence to a fixed frame count.
//!
//! Missing frames are synthesized by linear blending between neighbouring
//! source frames. Gaps are filled front to back: while the deficit countdown
//! is positive, each gap receives `floor(deficit / gaps) + 1` blended frames,
//! so the earliest gaps are the ones that get the extra frame. The assembled
//! sequence is then cut to the requested length.

use image::{ImageBuffer, Pixel};
use thiserror::Error;
use tracing::debug;

/// Rejected resample requests. Every variant is an invalid-input condition;
/// resampling performs no I/O and has no other failure modes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResampleError {
    #[error("invalid input: frame sequence is empty")]
    EmptySequence,
    #[error("invalid input: target frame count must be at least 1")]
    ZeroTarget,
    #[error("invalid input: frame {index} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Where one output frame comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    /// An exact copy of source frame `i`.
    Source(usize),
    /// A blend of source frames `left` and `left + 1` with weight `alpha` on
    /// the right-hand frame. Always strictly between 0 and 1.
    Blend { left: usize, alpha: f64 },
}

/// Compute the output layout for resampling `original_count` frames to
/// `target_count`, one slot per output frame.
///
/// With fewer than two source frames there is nothing to blend and the
/// layout is the source itself, whatever the target.
pub fn plan(original_count: usize, target_count: usize) -> Vec<Slot> {
    let n = original_count;
    if n <= 1 {
        return (0..n).map(Slot::Source).collect();
    }

    let gaps = n as i64 - 1;
    let deficit = target_count as i64 - n as i64;
    // Floor division; a shrinking request yields no insertions at all.
    let per_gap = deficit.div_euclid(gaps).max(0) as usize;
    let mut remaining = deficit;

    let mut slots = Vec::with_capacity(n);
    for i in 0..n - 1 {
        slots.push(Slot::Source(i));

        if remaining > 0 {
            let denom = (per_gap + 2) as f64;
            slots.extend((0..=per_gap).map(|j| Slot::Blend {
                left: i,
                alpha: (j + 1) as f64 / denom,
            }));
            remaining -= 1;
        }
    }
    slots.push(Slot::Source(n - 1));

    slots.truncate(target_count);
    slots
}

/// Pixel-wise `(1 - alpha) * a + alpha * b`, rounded and clamped to the
/// subpixel range. Callers check that both frames share dimensions.
pub(crate) fn blend<P>(a: &ImageBuffer<P, Vec<u8>>, b: &ImageBuffer<P, Vec<u8>>, alpha: f64) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    assert_eq!(a.dimensions(), b.dimensions(), "blended frames must share dimensions");

    let mut out = a.clone();
    let out_data: &mut [u8] = &mut out;
    let b_data: &[u8] = b;
    for (o, &y) in out_data.iter_mut().zip(b_data) {
        let v = (1.0 - alpha) * f64::from(*o) + alpha * f64::from(y);
        *o = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Resample `frames` to exactly `target_count` frames.
///
/// A single-frame sequence is returned unchanged regardless of
/// `target_count`. Blends that would fall past the cut are never computed.
pub fn resample<P>(
    frames: Vec<ImageBuffer<P, Vec<u8>>>,
    target_count: usize,
) -> Result<Vec<ImageBuffer<P, Vec<u8>>>, ResampleError>
where
    P: Pixel<Subpixel = u8>,
{
    let Some(first) = frames.first() else {
        return Err(ResampleError::EmptySequence);
    };
    if target_count == 0 {
        return Err(ResampleError::ZeroTarget);
    }

    let expected = first.dimensions();
    if let Some((index, frame)) = frames
        .iter()
        .enumerate()
        .find(|(_, f)| f.dimensions() != expected)
    {
        return Err(ResampleError::DimensionMismatch {
            index,
            expected,
            actual: frame.dimensions(),
        });
    }

    if frames.len() <= 1 {
        debug!(target_count, "single-frame sequence, nothing to interpolate");
        return Ok(frames);
    }

    let slots = plan(frames.len(), target_count);
    let blended = slots
        .iter()
        .filter(|s| matches!(s, Slot::Blend { .. }))
        .count();

    debug!(
        original_count = frames.len(),
        target_count,
        blended,
        "resampling frame sequence"
    );

    let out = slots
        .into_iter()
        .map(|slot| match slot {
            Slot::Source(i) => frames[i].clone(),
            Slot::Blend { left, alpha } => blend(&frames[left], &frames[left + 1], alpha),
        })
        .collect();

    Ok(out)
}
