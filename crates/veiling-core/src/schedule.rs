//! Price-schedule validation.
//!
//! A listing declares a contiguous run of steps, one per block over
//! `[start_block, end_block]`, with monotonically descending prices. The
//! strict Dutch form descends by `price_decrement` per block; the degenerate
//! single-block form is a fixed-price listing. PSBT payloads are only
//! checked for transport encoding and magic bytes — the broker never reads
//! their economic content.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::ScheduleError;
use crate::types::NewStep;

/// The 5-byte magic prefix of a serialized PSBT (`psbt\xff`).
pub const PSBT_MAGIC: [u8; 5] = [0x70, 0x73, 0x62, 0x74, 0xff];

/// Declared schedule envelope, as submitted alongside the steps.
#[derive(Clone, Copy, Debug)]
pub struct ScheduleParams {
    pub start_block: u64,
    pub end_block: u64,
    pub start_price_sats: u64,
    pub end_price_sats: u64,
    pub price_decrement: u64,
}

/// Decode a base64 PSBT blob and check the magic prefix. Nothing beyond the
/// first five bytes is inspected.
pub fn check_psbt_blob(psbt_data: &str) -> Result<(), String> {
    let bytes = BASE64
        .decode(psbt_data.trim())
        .map_err(|e| format!("not base64: {e}"))?;
    if bytes.len() < PSBT_MAGIC.len() || bytes[..PSBT_MAGIC.len()] != PSBT_MAGIC {
        return Err("missing psbt magic".to_string());
    }
    Ok(())
}

/// Validate a submitted schedule against its declared envelope.
///
/// Checks, in order: block coverage (exactly one step per height, no gaps or
/// duplicates), PSBT payload encoding, endpoint prices, monotonic descent,
/// and the decrement arithmetic. Intermediate steps must equal
/// `start_price - k * decrement` exactly; the final step must equal the
/// declared end price, which in turn must lie within one decrement of the
/// arithmetic value at the final index (integer rounding over the range).
pub fn validate(params: &ScheduleParams, steps: &[NewStep]) -> Result<(), ScheduleError> {
    if params.end_block < params.start_block {
        return Err(ScheduleError::InvertedRange {
            start: params.start_block,
            end: params.end_block,
        });
    }
    let span = params.end_block - params.start_block + 1;
    if steps.len() as u64 != span {
        return Err(ScheduleError::WrongStepCount { got: steps.len(), want: span });
    }

    let mut ordered: Vec<&NewStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.block_number);
    for pair in ordered.windows(2) {
        if pair[0].block_number == pair[1].block_number {
            return Err(ScheduleError::DuplicateStep(pair[0].block_number));
        }
    }
    for step in &ordered {
        if step.block_number < params.start_block || step.block_number > params.end_block {
            return Err(ScheduleError::StepOutOfRange {
                got: step.block_number,
                start: params.start_block,
                end: params.end_block,
            });
        }
        check_psbt_blob(&step.psbt_data).map_err(|reason| ScheduleError::InvalidPsbt {
            block: step.block_number,
            reason,
        })?;
    }
    // span steps, all distinct, all in range: coverage is contiguous.

    let first = ordered[0];
    let last = ordered[ordered.len() - 1];
    if first.price_sats != params.start_price_sats {
        return Err(ScheduleError::StartPriceMismatch {
            got: first.price_sats,
            want: params.start_price_sats,
        });
    }
    if last.price_sats != params.end_price_sats {
        return Err(ScheduleError::EndPriceMismatch {
            got: last.price_sats,
            want: params.end_price_sats,
        });
    }
    for pair in ordered.windows(2) {
        if pair[1].price_sats > pair[0].price_sats {
            return Err(ScheduleError::PriceIncrease(pair[1].block_number));
        }
    }

    if span == 1 {
        if params.start_price_sats != params.end_price_sats || params.price_decrement != 0 {
            return Err(ScheduleError::FixedPriceInvariant);
        }
        return Ok(());
    }

    if params.price_decrement == 0 {
        return Err(ScheduleError::ZeroDecrement);
    }
    for (k, step) in ordered.iter().enumerate().take(ordered.len() - 1) {
        let expected = (k as u64)
            .checked_mul(params.price_decrement)
            .and_then(|d| params.start_price_sats.checked_sub(d))
            .ok_or(ScheduleError::RangeInconsistent { end: params.end_price_sats })?;
        if step.price_sats != expected {
            return Err(ScheduleError::DecrementMismatch {
                block: step.block_number,
                got: step.price_sats,
                expected,
            });
        }
    }
    let ideal_last = params.start_price_sats as i128 - (span as i128 - 1) * params.price_decrement as i128;
    if (params.end_price_sats as i128 - ideal_last).abs() >= params.price_decrement as i128 {
        return Err(ScheduleError::RangeInconsistent { end: params.end_price_sats });
    }

    Ok(())
}
