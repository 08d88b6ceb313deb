//! Counterparty indexer client implementing [`AssetOracle`].

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::OutPoint;
use reqwest::Client;
use serde::Deserialize;

use veiling_core::error::OracleError;
use veiling_core::oracle::{AssetOracle, UtxoBalance};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CounterpartyClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct BalancesEnvelope {
    #[serde(default)]
    result: Vec<BalanceRecord>,
}

#[derive(Deserialize)]
struct BalanceRecord {
    asset: String,
    quantity_normalized: String,
    #[serde(alias = "divisibility")]
    divisible: bool,
}

impl CounterpartyClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            client: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("build reqwest client"),
            base_url: format!("http://{host}:{port}"),
        }
    }
}

#[async_trait]
impl AssetOracle for CounterpartyClient {
    async fn balances(&self, outpoint: OutPoint) -> Result<Vec<UtxoBalance>, OracleError> {
        let url = format!(
            "{}/v2/utxos/{}:{}/balances",
            self.base_url, outpoint.txid, outpoint.vout
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Transient(format!("counterparty: {e}")))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(OracleError::Transient(format!("counterparty: http {status}")));
        }
        if !status.is_success() {
            return Err(OracleError::Fatal(format!("counterparty: http {status}")));
        }

        let envelope: BalancesEnvelope = resp
            .json()
            .await
            .map_err(|e| OracleError::Fatal(format!("counterparty: malformed response: {e}")))?;

        Ok(envelope
            .result
            .into_iter()
            .map(|r| UtxoBalance {
                asset: r.asset,
                quantity_normalized: r.quantity_normalized,
                divisible: r.divisible,
            })
            .collect())
    }
}
