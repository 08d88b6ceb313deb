//! RocksDB-backed persistent listing store.
//!
//! Implements [`ListingStore`] using column families for listings, PSBT
//! steps, the active-UTXO guard index, and metadata. All mutations use an
//! atomic [`WriteBatch`] behind a single writer lock: the guard index is
//! checked and written in the same critical section, which closes the
//! TOCTOU window between concurrent admissions of the same UTXO.

use std::path::Path;

use bitcoin::OutPoint;
use bitcoin::hashes::Hash as _;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;

use veiling_core::error::StoreError;
use veiling_core::store::{ListingFilter, ListingStore};
use veiling_core::types::{Listing, ListingStatus, NewListing, NewStep, PsbtStep, SpendInfo};

// --- Column family names ---

const CF_LISTINGS: &str = "listings";
const CF_STEPS: &str = "steps";
const CF_UTXO_ACTIVE: &str = "utxo_active";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_LISTINGS, CF_STEPS, CF_UTXO_ACTIVE, CF_METADATA];

// --- Metadata keys ---

const META_NEXT_ID: &[u8] = b"next_listing_id";

/// RocksDB-backed persistent listing store.
///
/// `utxo_active` maps an outpoint to the id of the non-terminal listing
/// holding it; entries are inserted with the listing and deleted in the same
/// batch that writes a terminal status, so presence of a key *is* the
/// single-active invariant.
pub struct RocksStore {
    db: DB,
    write_lock: Mutex<()>,
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(backend)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(backend)
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn step_key(id: u64, block: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&id.to_be_bytes());
    key[8..].copy_from_slice(&block.to_be_bytes());
    key
}

fn outpoint_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(&outpoint.txid.to_byte_array());
    key[32..].copy_from_slice(&outpoint.vout.to_be_bytes());
    key
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path, creating all
    /// column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(backend)?;

        Ok(Self { db, write_lock: Mutex::new(()) })
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    /// Next listing id from the metadata counter. Ids start at 1.
    fn next_id(&self) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(cf, META_NEXT_ID).map_err(backend)? {
            Some(bytes) if bytes.len() == 8 => {
                Ok(u64::from_be_bytes(bytes.try_into().map_err(|_| {
                    StoreError::Backend("invalid id counter".to_string())
                })?))
            }
            Some(_) => Err(StoreError::Backend("invalid id counter length".to_string())),
            None => Ok(1),
        }
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend)
    }
}

impl ListingStore for RocksStore {
    fn insert_listing_atomic(
        &self,
        listing: NewListing,
        steps: Vec<NewStep>,
    ) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock();

        let cf_active = self.cf_handle(CF_UTXO_ACTIVE)?;
        let guard_key = outpoint_key(&listing.utxo);
        if let Some(bytes) = self.db.get_cf(cf_active, guard_key).map_err(backend)? {
            let holder = bytes
                .try_into()
                .map(u64::from_be_bytes)
                .map_err(|_| StoreError::Backend("invalid guard entry".to_string()))?;
            return Err(StoreError::UtxoConflict(holder));
        }

        let id = self.next_id()?;
        let listing = listing.into_listing(id);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_handle(CF_LISTINGS)?, id_key(id), encode(&listing)?);
        let cf_steps = self.cf_handle(CF_STEPS)?;
        for step in steps {
            let step = PsbtStep {
                listing_id: id,
                block_number: step.block_number,
                price_sats: step.price_sats,
                psbt_data: step.psbt_data,
            };
            batch.put_cf(cf_steps, step_key(id, step.block_number), encode(&step)?);
        }
        batch.put_cf(cf_active, guard_key, id_key(id));
        batch.put_cf(self.cf_handle(CF_METADATA)?, META_NEXT_ID, (id + 1).to_be_bytes());
        self.db.write(batch).map_err(backend)?;

        Ok(id)
    }

    fn get(&self, id: u64) -> Result<Option<Listing>, StoreError> {
        let cf = self.cf_handle(CF_LISTINGS)?;
        match self.db.get_cf(cf, id_key(id)).map_err(backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn step_for(&self, id: u64, block: u64) -> Result<Option<PsbtStep>, StoreError> {
        let cf = self.cf_handle(CF_STEPS)?;
        match self.db.get_cf(cf, step_key(id, block)).map_err(backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn steps_for(&self, id: u64) -> Result<Vec<PsbtStep>, StoreError> {
        let cf = self.cf_handle(CF_STEPS)?;
        let prefix = id.to_be_bytes();
        let mut steps = Vec::new();
        // Step keys are big-endian (id, block): iterating from the id prefix
        // yields the schedule in ascending block order.
        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward)) {
            let (key, value) = item.map_err(backend)?;
            if key.len() != 16 || key[..8] != prefix {
                break;
            }
            steps.push(decode(&value)?);
        }
        Ok(steps)
    }

    fn list(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        let cf = self.cf_handle(CF_LISTINGS)?;
        let mut listings = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(backend)?;
            let listing: Listing = decode(&value)?;
            if filter.matches(&listing) {
                listings.push(listing);
            }
        }
        Ok(listings)
    }

    fn update_status(
        &self,
        id: u64,
        new_status: ListingStatus,
        spend: Option<SpendInfo>,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();

        let mut listing = self.get(id)?.ok_or(StoreError::NotFound(id))?;
        if listing.status == new_status {
            return Ok(false);
        }
        if listing.status.is_terminal() {
            return Err(StoreError::TerminalStatus {
                id,
                status: listing.status,
                requested: new_status,
            });
        }
        if !listing.status.can_transition_to(new_status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: listing.status,
                to: new_status,
            });
        }
        if matches!(new_status, ListingStatus::Sold | ListingStatus::Closed) {
            if spend.is_none() {
                return Err(StoreError::SpendInfoMissing(new_status));
            }
            listing.spend = spend;
        }
        listing.status = new_status;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_handle(CF_LISTINGS)?, id_key(id), encode(&listing)?);
        if new_status.is_terminal() {
            batch.delete_cf(self.cf_handle(CF_UTXO_ACTIVE)?, outpoint_key(&listing.utxo));
        }
        self.db.write(batch).map_err(backend)?;

        Ok(true)
    }

    fn non_terminal_listings(&self) -> Result<Vec<Listing>, StoreError> {
        let cf = self.cf_handle(CF_UTXO_ACTIVE)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(backend)?;
            let id = value
                .as_ref()
                .try_into()
                .map(u64::from_be_bytes)
                .map_err(|_| StoreError::Backend("invalid guard entry".to_string()))?;
            ids.push(id);
        }
        ids.sort_unstable();

        let mut listings = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(id)? {
                Some(listing) => listings.push(listing),
                None => return Err(StoreError::Backend(format!("guard points at missing listing {id}"))),
            }
        }
        Ok(listings)
    }

    fn listings_watching_utxo(&self, outpoint: OutPoint) -> Result<Vec<Listing>, StoreError> {
        let cf = self.cf_handle(CF_UTXO_ACTIVE)?;
        match self.db.get_cf(cf, outpoint_key(&outpoint)).map_err(backend)? {
            Some(bytes) => {
                let id = bytes
                    .try_into()
                    .map(u64::from_be_bytes)
                    .map_err(|_| StoreError::Backend("invalid guard entry".to_string()))?;
                Ok(self.get(id)?.into_iter().collect())
            }
            None => Ok(Vec::new()),
        }
    }
}
