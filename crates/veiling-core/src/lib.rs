//! # veiling-core
//! Domain types, validation, and the listing state engine for veiling,
//! a progressive-reveal Dutch auction broker for UTXO-bound Counterparty
//! assets.

pub mod engine;
pub mod error;
pub mod oracle;
pub mod reveal;
pub mod schedule;
pub mod store;
pub mod types;

pub use error::{AdmissionError, BrokerError, OracleError, ScheduleError, StoreError};
pub use types::{Listing, ListingStatus, PsbtStep};
