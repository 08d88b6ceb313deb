//! Shared fixtures for the veiling-node integration tests: in-memory oracle
//! fakes and submission builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::OutPoint;
use parking_lot::Mutex;

use veiling_core::error::OracleError;
use veiling_core::oracle::{
    AssetOracle, ChainOracle, SpendingTx, TxOutSummary, UtxoBalance, UtxoInfo,
};
use veiling_core::types::NewStep;
use veiling_node::admission::ListingSubmission;

pub fn fake_psbt() -> String {
    let mut bytes = b"psbt\xff".to_vec();
    bytes.extend_from_slice(b"\x00opaque");
    BASE64.encode(bytes)
}

pub fn outpoint(byte: u8, vout: u32) -> OutPoint {
    format!("{}:{vout}", hex::encode([byte; 32])).parse().unwrap()
}

pub fn txid_hex(byte: u8) -> String {
    hex::encode([byte; 32])
}

/// The S1-shaped strict Dutch submission: 5 blocks from 850_000, prices
/// descending 100k -> 60k by 10k, 144 grace blocks.
pub fn dutch_submission(utxo: OutPoint) -> ListingSubmission {
    ListingSubmission {
        asset_name: "RAREPEPE".to_string(),
        asset_qty: "1".to_string(),
        utxo_txid: utxo.txid.to_string(),
        utxo_vout: utxo.vout,
        start_block: 850_000,
        end_block: 850_004,
        blocks_after_end: 144,
        start_price_sats: 100_000,
        end_price_sats: 60_000,
        price_decrement: 10_000,
        steps: (0..5)
            .map(|k| NewStep {
                block_number: 850_000 + k,
                price_sats: 100_000 - k * 10_000,
                psbt_data: fake_psbt(),
            })
            .collect(),
    }
}

/// Single-block fixed-price submission at the given height.
pub fn fixed_submission(utxo: OutPoint, block: u64, grace: u64) -> ListingSubmission {
    ListingSubmission {
        asset_name: "RAREPEPE".to_string(),
        asset_qty: "1".to_string(),
        utxo_txid: utxo.txid.to_string(),
        utxo_vout: utxo.vout,
        start_block: block,
        end_block: block,
        blocks_after_end: grace,
        start_price_sats: 50_000,
        end_price_sats: 50_000,
        price_decrement: 0,
        steps: vec![NewStep { block_number: block, price_sats: 50_000, psbt_data: fake_psbt() }],
    }
}

pub fn spending_tx(txid_byte: u8, height: u64, outputs: &[(u64, Option<&str>)]) -> SpendingTx {
    SpendingTx {
        txid: txid_hex(txid_byte).parse().unwrap(),
        block_height: height,
        outputs: outputs
            .iter()
            .map(|(value, addr)| TxOutSummary {
                value_sats: *value,
                address: addr.map(str::to_string),
            })
            .collect(),
        inputs: vec![],
    }
}

/// Scriptable chain oracle fake: a settable tip, a UTXO map, and recorded
/// spends. Spending a UTXO removes it from the unspent view.
pub struct MockChain {
    tip: AtomicU64,
    utxos: Mutex<HashMap<OutPoint, UtxoInfo>>,
    spends: Mutex<HashMap<OutPoint, SpendingTx>>,
    fail_transient: AtomicBool,
}

impl MockChain {
    pub fn new(tip: u64) -> Self {
        Self {
            tip: AtomicU64::new(tip),
            utxos: Mutex::new(HashMap::new()),
            spends: Mutex::new(HashMap::new()),
            fail_transient: AtomicBool::new(false),
        }
    }

    pub fn set_tip(&self, height: u64) {
        self.tip.store(height, Ordering::Relaxed);
    }

    pub fn add_utxo(&self, outpoint: OutPoint, value_sats: u64, confirmations: u64, address: Option<&str>) {
        self.utxos.lock().insert(
            outpoint,
            UtxoInfo { value_sats, confirmations, address: address.map(str::to_string) },
        );
    }

    pub fn spend(&self, outpoint: OutPoint, tx: SpendingTx) {
        self.utxos.lock().remove(&outpoint);
        self.spends.lock().insert(outpoint, tx);
    }

    pub fn set_transient_failure(&self, failing: bool) {
        self.fail_transient.store(failing, Ordering::Relaxed);
    }

    fn check_up(&self) -> Result<(), OracleError> {
        if self.fail_transient.load(Ordering::Relaxed) {
            Err(OracleError::Transient("mock chain unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainOracle for MockChain {
    async fn tip(&self) -> Result<u64, OracleError> {
        self.check_up()?;
        Ok(self.tip.load(Ordering::Relaxed))
    }

    async fn utxo(&self, outpoint: OutPoint) -> Result<Option<UtxoInfo>, OracleError> {
        self.check_up()?;
        Ok(self.utxos.lock().get(&outpoint).cloned())
    }

    async fn spending_tx(&self, outpoint: OutPoint) -> Result<Option<SpendingTx>, OracleError> {
        self.check_up()?;
        Ok(self.spends.lock().get(&outpoint).cloned())
    }
}

/// Asset oracle fake: a balance map keyed by outpoint.
pub struct MockAssets {
    balances: Mutex<HashMap<OutPoint, Vec<UtxoBalance>>>,
}

impl MockAssets {
    pub fn new() -> Self {
        Self { balances: Mutex::new(HashMap::new()) }
    }

    pub fn bind(&self, outpoint: OutPoint, asset: &str, quantity: &str, divisible: bool) {
        self.balances.lock().entry(outpoint).or_default().push(UtxoBalance {
            asset: asset.to_string(),
            quantity_normalized: quantity.to_string(),
            divisible,
        });
    }
}

#[async_trait]
impl AssetOracle for MockAssets {
    async fn balances(&self, outpoint: OutPoint) -> Result<Vec<UtxoBalance>, OracleError> {
        Ok(self.balances.lock().get(&outpoint).cloned().unwrap_or_default())
    }
}
