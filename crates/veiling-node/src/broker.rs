//! Broker composition: the event pipeline and the read/admit surface.
//!
//! Two redundant event sources drive the state engine — the ZMQ push channel
//! and the poll scheduler — and both converge on [`Broker::sweep_blocks`] /
//! spend detection. Duplicate delivery is expected and harmless: the store's
//! forward-only progression check is the dedup, so there is no handled-event
//! bookkeeping anywhere. Pipeline errors never propagate to users; they are
//! logged and the affected listing is retried on the next tick.

use std::sync::Arc;

use bitcoin::OutPoint;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use veiling_core::engine;
use veiling_core::error::{AdmissionError, BrokerError, OracleError, StoreError};
use veiling_core::oracle::{AssetOracle, ChainEvent, ChainOracle, SpendingTx};
use veiling_core::reveal::{self, RevealDecision, RevealOutcome};
use veiling_core::store::{ListingFilter, ListingStore};
use veiling_core::types::Listing;

use crate::admission::{self, ListingSubmission};
use crate::config::Config;

/// Process-scoped application context: store and oracle handles plus the
/// event pipeline. Constructed once at startup, shared via `Arc`.
pub struct Broker {
    store: Arc<dyn ListingStore>,
    chain: Arc<dyn ChainOracle>,
    assets: Arc<dyn AssetOracle>,
    config: Config,
}

impl Broker {
    pub fn new(
        store: Arc<dyn ListingStore>,
        chain: Arc<dyn ChainOracle>,
        assets: Arc<dyn AssetOracle>,
        config: Config,
    ) -> Self {
        Self { store, chain, assets, config }
    }

    // --- Read / admit surface ---

    pub async fn admit(&self, sub: ListingSubmission) -> Result<Listing, AdmissionError> {
        admission::admit(self.chain.as_ref(), self.assets.as_ref(), self.store.as_ref(), sub).await
    }

    pub fn listing(&self, id: u64) -> Result<Option<Listing>, StoreError> {
        self.store.get(id)
    }

    pub fn listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        self.store.list(filter)
    }

    pub async fn tip(&self) -> Result<u64, OracleError> {
        self.chain.tip().await
    }

    /// Revelation: the step the current tip entitles a caller to, or the
    /// explanatory kind. `None` means the listing does not exist.
    pub async fn current_psbt(&self, id: u64) -> Result<Option<RevealOutcome>, BrokerError> {
        let Some(listing) = self.store.get(id)? else {
            return Ok(None);
        };
        let tip = self.chain.tip().await?;
        let outcome = match reveal::decide(&listing, tip) {
            RevealDecision::Step(height) => {
                let step = self.store.step_for(id, height)?.ok_or_else(|| {
                    StoreError::Backend(format!("listing {id} has no step at {height}"))
                })?;
                RevealOutcome { status: listing.status, step: Some(step), kind: None }
            }
            RevealDecision::Hidden(kind) => {
                RevealOutcome { status: listing.status, step: None, kind: Some(kind) }
            }
        };
        Ok(Some(outcome))
    }

    // --- Event pipeline ---

    /// Run the event loop until shutdown: push events from the ZMQ channel
    /// plus the two fallback poll tickers, all converging on the same
    /// engine. If the push channel closes (ZMQ disabled or its threads
    /// died), the loop degrades to poll-only mode.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut block_tick = tokio::time::interval(self.config.block_poll_interval());
        let mut utxo_tick = tokio::time::interval(self.config.utxo_poll_interval());
        block_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        utxo_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv(), if events_open => match event {
                    Some(ChainEvent::NewBlock) => self.sweep_blocks().await,
                    Some(ChainEvent::TxSeen { inputs }) => self.handle_tx_inputs(&inputs).await,
                    None => {
                        debug!("push channel closed; continuing in poll-only mode");
                        events_open = false;
                    }
                },
                _ = block_tick.tick() => self.sweep_blocks().await,
                _ = utxo_tick.tick() => self.sweep_spends().await,
            }
        }
        info!("event pipeline stopped");
    }

    /// Drive block-height transitions for every non-terminal listing
    /// against a fresh tip.
    pub async fn sweep_blocks(&self) {
        let tip = match self.chain.tip().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!("block sweep skipped: {e}");
                return;
            }
        };
        let listings = match self.store.non_terminal_listings() {
            Ok(listings) => listings,
            Err(e) => {
                warn!("block sweep skipped: {e}");
                return;
            }
        };
        for listing in listings {
            if let Err(e) = self.evaluate_and_apply(&listing, tip, None).await {
                warn!(id = listing.id, "transition failed: {e}");
            }
        }
    }

    /// Detect confirmed spends for every non-terminal listing. The
    /// authoritative fallback for silently dropped push messages.
    pub async fn sweep_spends(&self) {
        let tip = match self.chain.tip().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!("spend sweep skipped: {e}");
                return;
            }
        };
        let listings = match self.store.non_terminal_listings() {
            Ok(listings) => listings,
            Err(e) => {
                warn!("spend sweep skipped: {e}");
                return;
            }
        };
        for listing in listings {
            self.check_spend(&listing, tip).await;
        }
    }

    /// Intersect a pushed transaction's input outpoints with the watched
    /// UTXO set and evaluate the affected listings.
    pub async fn handle_tx_inputs(&self, inputs: &[OutPoint]) {
        let mut affected: Vec<Listing> = Vec::new();
        for outpoint in inputs {
            match self.store.listings_watching_utxo(*outpoint) {
                Ok(listings) => affected.extend(listings),
                Err(e) => warn!(%outpoint, "watch lookup failed: {e}"),
            }
        }
        if affected.is_empty() {
            return;
        }
        let tip = match self.chain.tip().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!("tx event skipped: {e}");
                return;
            }
        };
        for listing in affected {
            self.check_spend(&listing, tip).await;
        }
    }

    async fn check_spend(&self, listing: &Listing, tip: u64) {
        match self.detect_spend(listing).await {
            Ok(Some(spend)) => {
                if let Err(e) = self.evaluate_and_apply(listing, tip, Some(&spend)).await {
                    warn!(id = listing.id, "spend transition failed: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(id = listing.id, "spend check skipped: {e}"),
        }
    }

    /// A confirmed spend observation for the listing's UTXO, if one exists.
    /// A mempool-only spend (gettxout already empty, no confirmed spender
    /// located) yields nothing; the next sweep picks it up once confirmed.
    async fn detect_spend(&self, listing: &Listing) -> Result<Option<SpendingTx>, OracleError> {
        if !self.chain.is_spent(listing.utxo).await? {
            return Ok(None);
        }
        match self.chain.spending_tx(listing.utxo).await? {
            Some(tx) => Ok(Some(tx)),
            None => {
                debug!(id = listing.id, "utxo spent but spending tx not confirmed yet");
                Ok(None)
            }
        }
    }

    async fn evaluate_and_apply(
        &self,
        listing: &Listing,
        tip: u64,
        spend: Option<&SpendingTx>,
    ) -> Result<(), BrokerError> {
        let prices = match spend {
            Some(_) => self.store.step_prices(listing.id)?,
            None => Vec::new(),
        };
        let Some(transition) = engine::evaluate(listing, tip, spend, &prices, Utc::now()) else {
            return Ok(());
        };
        match self.store.update_status(listing.id, transition.to, transition.spend) {
            Ok(true) => {
                info!(id = listing.id, from = %listing.status, to = %transition.to, "listing transition");
                Ok(())
            }
            Ok(false) => Ok(()),
            // Lost the race against the other event path; terminality is
            // sticky and the first write wins.
            Err(StoreError::TerminalStatus { .. }) | Err(StoreError::InvalidTransition { .. }) => {
                debug!(id = listing.id, "transition superseded");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
