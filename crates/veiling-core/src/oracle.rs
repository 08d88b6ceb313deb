//! Capability traits for the broker's external oracles.
//!
//! These traits define the contracts between the core and its chain-facing
//! adapters:
//! - [`ChainOracle`] — Bitcoin node view: tip, UTXO status, spend lookup
//!   (veiling-node implements over JSON-RPC)
//! - [`AssetOracle`] — Counterparty indexer: asset balances bound to a UTXO
//!   (veiling-node implements over HTTP)
//!
//! Push delivery (new blocks, new transactions) is transport-specific and
//! owned by the node's subscriber loops, which feed [`ChainEvent`]s into the
//! broker's event channel; it is not part of the trait surface.

use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};

use crate::error::OracleError;

/// Confirmed, unspent output as reported by the chain oracle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoInfo {
    pub value_sats: u64,
    pub confirmations: u64,
    /// Address form of the controlling scriptPubKey, when one exists.
    pub address: Option<String>,
}

/// One output of a spending transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutSummary {
    pub value_sats: u64,
    pub address: Option<String>,
}

/// A confirmed transaction that consumed a watched UTXO.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpendingTx {
    pub txid: Txid,
    pub block_height: u64,
    pub outputs: Vec<TxOutSummary>,
    pub inputs: Vec<OutPoint>,
}

/// An asset balance bound to a UTXO, as reported by the indexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoBalance {
    pub asset: String,
    pub quantity_normalized: String,
    pub divisible: bool,
}

/// Push notification from the chain, delivered by the node's subscriber
/// loops into the broker event channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// A new best block was announced; the current height is re-derived
    /// through [`ChainOracle::tip`].
    NewBlock,
    /// A transaction was seen spending the given outpoints.
    TxSeen { inputs: Vec<OutPoint> },
}

/// Read-only view of confirmed Bitcoin chain state.
///
/// Every method may fail [`OracleError::Transient`] (network, timeout) or
/// [`OracleError::Fatal`] (auth, malformed response). Transient failures
/// never alter listing state; callers retry on the next tick or event.
#[async_trait]
pub trait ChainOracle: Send + Sync {
    /// Height of the current best-chain tip.
    async fn tip(&self) -> Result<u64, OracleError>;

    /// Look up a UTXO. `None` means bitcoind no longer reports the output
    /// as unspent (spent, or never existed).
    async fn utxo(&self, outpoint: OutPoint) -> Result<Option<UtxoInfo>, OracleError>;

    /// Whether the outpoint has been consumed.
    ///
    /// Default implementation delegates to [`utxo`](Self::utxo): for an
    /// outpoint that was proven to exist at admission, a missing answer
    /// means spent.
    async fn is_spent(&self, outpoint: OutPoint) -> Result<bool, OracleError> {
        Ok(self.utxo(outpoint).await?.is_none())
    }

    /// Locate the confirmed transaction that consumed the outpoint, if it
    /// can be found. A pure query of confirmed chain state; implementations
    /// may bound the search (e.g. a recent-block scan) and return `None`
    /// past that bound.
    async fn spending_tx(&self, outpoint: OutPoint) -> Result<Option<SpendingTx>, OracleError>;
}

/// Counterparty indexer view: which assets a UTXO carries.
#[async_trait]
pub trait AssetOracle: Send + Sync {
    /// All asset balances bound to the outpoint. The full set is returned
    /// so admission can reject multi-asset UTXOs.
    async fn balances(&self, outpoint: OutPoint) -> Result<Vec<UtxoBalance>, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapChain {
        tip: u64,
        utxos: Mutex<HashMap<OutPoint, UtxoInfo>>,
    }

    #[async_trait]
    impl ChainOracle for MapChain {
        async fn tip(&self) -> Result<u64, OracleError> {
            Ok(self.tip)
        }

        async fn utxo(&self, outpoint: OutPoint) -> Result<Option<UtxoInfo>, OracleError> {
            Ok(self.utxos.lock().unwrap().get(&outpoint).cloned())
        }

        async fn spending_tx(&self, _outpoint: OutPoint) -> Result<Option<SpendingTx>, OracleError> {
            Ok(None)
        }
    }

    fn outpoint(n: u8) -> OutPoint {
        format!("{}:0", hex::encode([n; 32])).parse().unwrap()
    }

    #[tokio::test]
    async fn default_is_spent_tracks_utxo_presence() {
        let chain = MapChain { tip: 100, utxos: Mutex::new(HashMap::new()) };
        let op = outpoint(1);
        assert!(chain.is_spent(op).await.unwrap());

        chain.utxos.lock().unwrap().insert(
            op,
            UtxoInfo { value_sats: 600, confirmations: 3, address: None },
        );
        assert!(!chain.is_spent(op).await.unwrap());
    }

    #[tokio::test]
    async fn chain_oracle_is_object_safe() {
        let chain = MapChain { tip: 7, utxos: Mutex::new(HashMap::new()) };
        let dyn_chain: &dyn ChainOracle = &chain;
        assert_eq!(dyn_chain.tip().await.unwrap(), 7);
    }
}
