use crate::alert::AlertDispatcher;
use crate::classifier::Classifier;
use crate::price::PriceOracle;
use crate::rpc::{BlockSource, Upstream};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

/// Drives the poll/fetch/classify/dispatch cycle and owns the block cursor.
/// The cursor is monotonically non-decreasing for the lifetime of the
/// process; each block number in a run is handed to the classifier at most
/// once, in strictly ascending order.
pub struct Monitor<C> {
    client: C,
    oracle: PriceOracle,
    classifier: Classifier,
    dispatcher: AlertDispatcher,
    check_interval: Duration,
    last_block: u64,
    alerts_sent: u64,
}

impl<C: BlockSource> Monitor<C> {
    pub fn new(
        client: C,
        oracle: PriceOracle,
        classifier: Classifier,
        dispatcher: AlertDispatcher,
        check_interval: Duration,
    ) -> Self {
        Monitor {
            client,
            oracle,
            classifier,
            dispatcher,
            check_interval,
            last_block: 0,
            alerts_sent: 0,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.last_block
    }

    pub fn alerts_dispatched(&self) -> u64 {
        self.alerts_sent
    }

    /// Establishes the starting cursor from the current chain head. This is
    /// the only call whose failure terminates the process: without an
    /// initial cursor there is nothing to advance from.
    pub async fn initialize(&mut self) -> Result<()> {
        match self.client.latest_block_number().await {
            Upstream::Available(head) => {
                self.last_block = head;
                info!("Starting block: {}", head);
                Ok(())
            }
            Upstream::Unavailable => {
                anyhow::bail!("Could not fetch the current head block to establish a cursor")
            }
        }
    }

    /// Runs until the stop signal flips. The in-flight cycle always
    /// finishes before the loop exits; the interval is measured from the
    /// end of one cycle to the start of the next.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.initialize().await?;

        loop {
            self.run_cycle().await;

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = sleep(self.check_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Stop channel closed; shutting down");
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!(
            "Monitor stopped; {} alert(s) dispatched this session",
            self.alerts_sent
        );
        Ok(())
    }

    /// One poll cycle: query the head, scan `(cursor, head]` in ascending
    /// order, advance the cursor. Every failure inside a cycle is logged
    /// and absorbed; the loop never terminates on a runtime error.
    pub async fn run_cycle(&mut self) {
        let latest = match self.client.latest_block_number().await {
            Upstream::Available(number) => number,
            Upstream::Unavailable => {
                warn!("Latest block number unavailable; retrying next cycle");
                return;
            }
        };

        if latest <= self.last_block {
            info!("Waiting for new blocks (latest: {})", latest);
            return;
        }

        info!("Checking blocks {} to {}", self.last_block + 1, latest);
        for number in self.last_block + 1..=latest {
            self.process_block(number).await;
        }

        // The cursor covers the whole polled range even when an individual
        // fetch failed: that block's transactions are skipped permanently.
        self.last_block = latest;
    }

    async fn process_block(&mut self, number: u64) {
        let txs = match self.client.block_transactions(number).await {
            Upstream::Available(txs) => txs,
            Upstream::Unavailable => {
                warn!(
                    "Block {} fetch failed; its transactions will not be scanned",
                    number
                );
                return;
            }
        };
        if txs.is_empty() {
            return;
        }

        let price = self.oracle.current_price().await;
        for tx in &txs {
            if let Some(event) = self.classifier.classify(tx, price) {
                self.dispatcher.dispatch(&event).await;
                self.alerts_sent += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ObservedTx;
    use alloy_primitives::{Address, B256, Bytes, U256};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Chain stub fed with a script of head responses and per-block
    /// transaction sets; records every block fetch it serves.
    #[derive(Default)]
    struct ScriptedChain {
        heads: Mutex<VecDeque<Upstream<u64>>>,
        blocks: Mutex<HashMap<u64, Upstream<Vec<ObservedTx>>>>,
        fetched: Mutex<Vec<u64>>,
    }

    impl ScriptedChain {
        fn push_head(&self, head: Upstream<u64>) {
            self.heads.lock().unwrap().push_back(head);
        }

        fn set_block(&self, number: u64, txs: Upstream<Vec<ObservedTx>>) {
            self.blocks.lock().unwrap().insert(number, txs);
        }

        fn fetched(&self) -> Vec<u64> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl BlockSource for Arc<ScriptedChain> {
        async fn latest_block_number(&self) -> Upstream<u64> {
            self.heads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Upstream::Unavailable)
        }

        async fn block_transactions(&self, number: u64) -> Upstream<Vec<ObservedTx>> {
            self.fetched.lock().unwrap().push(number);
            self.blocks
                .lock()
                .unwrap()
                .get(&number)
                .cloned()
                .unwrap_or(Upstream::Available(Vec::new()))
        }
    }

    fn monitor(chain: Arc<ScriptedChain>) -> Monitor<Arc<ScriptedChain>> {
        Monitor::new(
            chain,
            // Unroutable endpoint: every lookup falls back to the default
            // price, exercising the fault-isolation path.
            PriceOracle::with_endpoint("http://127.0.0.1:1/price"),
            Classifier::with_rules(100_000.0, Default::default()),
            AlertDispatcher::new(None, vec![50_000, 100_000, 500_000, 1_000_000]),
            Duration::from_secs(30),
        )
    }

    fn whale_tx(block: u64) -> ObservedTx {
        ObservedTx {
            hash: B256::repeat_byte(0x11),
            from: Address::repeat_byte(0xaa),
            to: Some(Address::repeat_byte(0xbb)),
            // 100 ETH; $200k at the default price, above the $100k floor.
            value: U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64)),
            input: Bytes::new(),
            block,
        }
    }

    #[tokio::test]
    async fn initialize_sets_cursor_to_head() {
        let chain = Arc::new(ScriptedChain::default());
        chain.push_head(Upstream::Available(100));
        let mut monitor = monitor(chain);
        monitor.initialize().await.unwrap();
        assert_eq!(monitor.cursor(), 100);
    }

    #[tokio::test]
    async fn initialize_fails_when_head_unavailable() {
        let chain = Arc::new(ScriptedChain::default());
        chain.push_head(Upstream::Unavailable);
        let mut monitor = monitor(chain);
        assert!(monitor.initialize().await.is_err());
    }

    #[tokio::test]
    async fn new_blocks_are_scanned_ascending_and_cursor_advances() {
        let chain = Arc::new(ScriptedChain::default());
        chain.push_head(Upstream::Available(100));
        chain.push_head(Upstream::Available(102));
        chain.set_block(101, Upstream::Available(vec![whale_tx(101)]));
        chain.set_block(102, Upstream::Available(Vec::new()));

        let mut monitor = monitor(chain.clone());
        monitor.initialize().await.unwrap();
        monitor.run_cycle().await;

        assert_eq!(chain.fetched(), vec![101, 102]);
        assert_eq!(monitor.cursor(), 102);
        assert_eq!(monitor.alerts_dispatched(), 1);
    }

    #[tokio::test]
    async fn no_block_is_processed_twice() {
        let chain = Arc::new(ScriptedChain::default());
        chain.push_head(Upstream::Available(100));
        chain.push_head(Upstream::Available(102));
        chain.push_head(Upstream::Available(102));
        chain.push_head(Upstream::Available(101));

        let mut monitor = monitor(chain.clone());
        monitor.initialize().await.unwrap();
        monitor.run_cycle().await;
        // Caught up: a repeated head fetches nothing new.
        monitor.run_cycle().await;
        // A head behind the cursor never rewinds it.
        monitor.run_cycle().await;

        assert_eq!(chain.fetched(), vec![101, 102]);
        assert_eq!(monitor.cursor(), 102);
    }

    #[tokio::test]
    async fn unavailable_head_leaves_cursor_untouched() {
        let chain = Arc::new(ScriptedChain::default());
        chain.push_head(Upstream::Available(100));
        chain.push_head(Upstream::Unavailable);
        chain.push_head(Upstream::Available(101));

        let mut monitor = monitor(chain.clone());
        monitor.initialize().await.unwrap();
        monitor.run_cycle().await;
        assert_eq!(monitor.cursor(), 100);
        assert!(chain.fetched().is_empty());

        monitor.run_cycle().await;
        assert_eq!(monitor.cursor(), 101);
        assert_eq!(chain.fetched(), vec![101]);
    }

    #[tokio::test]
    async fn cursor_advances_past_failed_block_fetch() {
        let chain = Arc::new(ScriptedChain::default());
        chain.push_head(Upstream::Available(100));
        chain.push_head(Upstream::Available(102));
        chain.set_block(101, Upstream::Unavailable);
        chain.set_block(102, Upstream::Available(vec![whale_tx(102)]));

        let mut monitor = monitor(chain.clone());
        monitor.initialize().await.unwrap();
        monitor.run_cycle().await;

        // Block 101 is skipped permanently; 102 is still scanned.
        assert_eq!(chain.fetched(), vec![101, 102]);
        assert_eq!(monitor.cursor(), 102);
        assert_eq!(monitor.alerts_dispatched(), 1);
    }

    #[tokio::test]
    async fn below_threshold_transactions_dispatch_nothing() {
        let chain = Arc::new(ScriptedChain::default());
        chain.push_head(Upstream::Available(100));
        chain.push_head(Upstream::Available(101));
        let mut small = whale_tx(101);
        small.value = U256::from(10u64).pow(U256::from(18u64)); // 1 ETH
        chain.set_block(101, Upstream::Available(vec![small]));

        let mut monitor = monitor(chain.clone());
        monitor.initialize().await.unwrap();
        monitor.run_cycle().await;

        assert_eq!(monitor.alerts_dispatched(), 0);
        assert_eq!(monitor.cursor(), 101);
    }
}
