//! Bitcoin Core JSON-RPC client implementing [`ChainOracle`].
//!
//! Transport failures and timeouts classify as [`OracleError::Transient`];
//! rejected credentials and malformed responses as [`OracleError::Fatal`].
//! The spending-transaction lookup is a bounded backward scan over recent
//! blocks (`getblock` verbosity 2) — semantically a pure query of confirmed
//! chain state.

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Amount, OutPoint, Txid};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use veiling_core::error::OracleError;
use veiling_core::oracle::{ChainOracle, SpendingTx, TxOutSummary, UtxoInfo};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// `getblockcount` while the node is still verifying blocks.
const RPC_IN_WARMUP: i64 = -28;

pub struct BitcoindClient {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
    /// How many blocks below the tip `spending_tx` will scan.
    spend_scan_depth: u64,
}

// --- RPC response shapes ---

#[derive(Deserialize)]
struct TxOutEntry {
    confirmations: u64,
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKeyInfo,
}

#[derive(Deserialize)]
struct ScriptPubKeyInfo {
    #[serde(default)]
    address: Option<String>,
}

#[derive(Deserialize)]
struct VerboseBlock {
    tx: Vec<VerboseTx>,
}

#[derive(Deserialize)]
struct VerboseTx {
    txid: String,
    vin: Vec<VerboseVin>,
    vout: Vec<VerboseVout>,
}

/// Coinbase inputs carry a `coinbase` field instead of txid/vout.
#[derive(Deserialize)]
struct VerboseVin {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
}

#[derive(Deserialize)]
struct VerboseVout {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKeyInfo,
}

fn btc_to_sats(value: f64) -> Result<u64, OracleError> {
    Amount::from_btc(value)
        .map(|a| a.to_sat())
        .map_err(|e| OracleError::Fatal(format!("unrepresentable amount {value}: {e}")))
}

fn utxo_from_entry(entry: TxOutEntry) -> Result<UtxoInfo, OracleError> {
    Ok(UtxoInfo {
        value_sats: btc_to_sats(entry.value)?,
        confirmations: entry.confirmations,
        address: entry.script_pub_key.address,
    })
}

fn spending_tx_from_verbose(tx: &VerboseTx, height: u64) -> Result<SpendingTx, OracleError> {
    let txid: Txid = tx
        .txid
        .parse()
        .map_err(|e| OracleError::Fatal(format!("malformed txid {}: {e}", tx.txid)))?;
    let mut outputs = Vec::with_capacity(tx.vout.len());
    for out in &tx.vout {
        outputs.push(TxOutSummary {
            value_sats: btc_to_sats(out.value)?,
            address: out.script_pub_key.address.clone(),
        });
    }
    let mut inputs = Vec::with_capacity(tx.vin.len());
    for vin in &tx.vin {
        if let (Some(prev_txid), Some(prev_vout)) = (&vin.txid, vin.vout) {
            let prev: Txid = prev_txid
                .parse()
                .map_err(|e| OracleError::Fatal(format!("malformed outpoint txid: {e}")))?;
            inputs.push(OutPoint { txid: prev, vout: prev_vout });
        }
    }
    Ok(SpendingTx { txid, block_height: height, outputs, inputs })
}

impl BitcoindClient {
    pub fn new(endpoint: &str, user: &str, password: &str, spend_scan_depth: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(RPC_TIMEOUT)
                .build()
                .expect("build reqwest client"),
            endpoint: endpoint.to_owned(),
            user: user.to_owned(),
            password: password.to_owned(),
            spend_scan_depth,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, OracleError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "veiling",
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transient(format!("{method}: {e}")))?;

        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            return Err(OracleError::Fatal("bitcoind rejected rpc credentials".to_string()));
        }

        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| OracleError::Fatal(format!("{method}: malformed response: {e}")))?;

        if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(match code {
                RPC_IN_WARMUP => OracleError::Transient(format!("{method}: {message}")),
                _ => OracleError::Fatal(format!("{method}: rpc error {code}: {message}")),
            });
        }

        serde_json::from_value(envelope.get("result").cloned().unwrap_or(Value::Null))
            .map_err(|e| OracleError::Fatal(format!("{method}: unexpected result shape: {e}")))
    }
}

#[async_trait]
impl ChainOracle for BitcoindClient {
    async fn tip(&self) -> Result<u64, OracleError> {
        self.call("getblockcount", json!([])).await
    }

    async fn utxo(&self, outpoint: OutPoint) -> Result<Option<UtxoInfo>, OracleError> {
        // include_mempool=true: an output already claimed by a mempool
        // transaction no longer counts as available.
        let entry: Option<TxOutEntry> = self
            .call("gettxout", json!([outpoint.txid.to_string(), outpoint.vout, true]))
            .await?;
        entry.map(utxo_from_entry).transpose()
    }

    async fn spending_tx(&self, outpoint: OutPoint) -> Result<Option<SpendingTx>, OracleError> {
        let tip = self.tip().await?;
        let floor = tip.saturating_sub(self.spend_scan_depth);
        let target = outpoint.txid.to_string();

        for height in (floor..=tip).rev() {
            let hash: String = self.call("getblockhash", json!([height])).await?;
            let block: VerboseBlock = self.call("getblock", json!([hash, 2])).await?;
            for tx in &block.tx {
                let spends = tx
                    .vin
                    .iter()
                    .any(|vin| vin.txid.as_deref() == Some(target.as_str()) && vin.vout == Some(outpoint.vout));
                if spends {
                    return Ok(Some(spending_tx_from_verbose(tx, height)?));
                }
            }
        }
        Ok(None)
    }
}
