//! Error types for the veiling broker.
use thiserror::Error;

use crate::types::ListingStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("unparseable quantity: {0}")] Unparseable(String),
    #[error("negative quantity")] Negative,
    #[error("more than {max} fractional digits")] TooPrecise { max: u32 },
    #[error("indivisible asset quantity must be a whole number")] FractionalIndivisible,
    #[error("quantity overflow")] Overflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("end block {end} precedes start block {start}")] InvertedRange { start: u64, end: u64 },
    #[error("{got} step(s) for a {want}-block range")] WrongStepCount { got: usize, want: u64 },
    #[error("duplicate step for block {0}")] DuplicateStep(u64),
    #[error("step block {got} outside [{start}, {end}]")] StepOutOfRange { got: u64, start: u64, end: u64 },
    #[error("first step price {got} != start price {want}")] StartPriceMismatch { got: u64, want: u64 },
    #[error("last step price {got} != end price {want}")] EndPriceMismatch { got: u64, want: u64 },
    #[error("price increases at block {0}")] PriceIncrease(u64),
    #[error("zero decrement on a multi-block schedule")] ZeroDecrement,
    #[error("step at block {block} deviates from the decrement: got {got}, expected {expected}")] DecrementMismatch { block: u64, got: u64, expected: u64 },
    #[error("end price {end} inconsistent with the decrement over the range")] RangeInconsistent { end: u64 },
    #[error("fixed-price listing requires equal prices and zero decrement")] FixedPriceInvariant,
    #[error("invalid PSBT at block {block}: {reason}")] InvalidPsbt { block: u64, reason: String },
}

/// Oracle failures, classified per the retry policy: transient failures are
/// retried on the next tick and never alter listing state; fatal failures
/// need operator intervention.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("transient oracle failure: {0}")] Transient(String),
    #[error("fatal oracle failure: {0}")] Fatal(String),
}

impl OracleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("listing not found: {0}")] NotFound(u64),
    #[error("utxo already backs non-terminal listing {0}")] UtxoConflict(u64),
    #[error("listing {id} is terminal ({status}); refusing {requested}")] TerminalStatus { id: u64, status: ListingStatus, requested: ListingStatus },
    #[error("invalid transition for listing {id}: {from} -> {to}")] InvalidTransition { id: u64, from: ListingStatus, to: ListingStatus },
    #[error("spend info required for status {0}")] SpendInfoMissing(ListingStatus),
    #[error("storage: {0}")] Backend(String),
}

/// Admission rejections. Everything except `Oracle(Transient)` is a verdict
/// on the submission itself; transient oracle failures are retriable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("invalid submission: {0}")] Shape(String),
    #[error(transparent)] Schedule(#[from] ScheduleError),
    #[error("start block {start} is not past the current tip {tip}")] NotInFuture { start: u64, tip: u64 },
    #[error("utxo unavailable: {0}")] UtxoUnavailable(String),
    #[error("asset mismatch: {0}")] AssetMismatch(String),
    #[error("utxo already backs non-terminal listing {0}")] UtxoInUse(u64),
    #[error(transparent)] Oracle(#[from] OracleError),
    #[error(transparent)] Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error(transparent)] Oracle(#[from] OracleError),
    #[error(transparent)] Store(#[from] StoreError),
}
