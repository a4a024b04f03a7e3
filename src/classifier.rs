use crate::config::Config;
use crate::price::PriceSnapshot;
use crate::rpc::ObservedTx;
use alloy_primitives::{Address, B256, U256, utils::format_ether};
use std::collections::HashSet;

/// 4-byte selector of `transfer(address,uint256)`.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

// transfer(address,uint256) calldata: 4-byte selector, 32-byte recipient
// word, 32-byte amount word.
const AMOUNT_WORD: std::ops::Range<usize> = 36..68;

/// A transaction that qualified as a whale movement.
#[derive(Debug, Clone, PartialEq)]
pub enum WhaleEvent {
    NativeTransfer {
        amount_eth: f64,
        value_usd: f64,
        from: Address,
        to: Address,
        hash: B256,
        block: u64,
    },
    /// ERC-20 `transfer` call on a watched contract. `raw_amount` is in the
    /// token's smallest unit; decimals are not resolved.
    TokenTransfer {
        token: Address,
        raw_amount: U256,
        from: Address,
        to: Address,
        hash: B256,
        block: u64,
    },
}

/// Classifies observed transactions against the configured rules. Pure:
/// the same transaction and price always produce the same outcome.
pub struct Classifier {
    min_value_usd: f64,
    watched_tokens: HashSet<Address>,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        Self::with_rules(config.min_value_usd, config.watched_tokens.clone())
    }

    pub fn with_rules(min_value_usd: f64, watched_tokens: HashSet<Address>) -> Self {
        Classifier {
            min_value_usd,
            watched_tokens,
        }
    }

    /// Returns at most one event per transaction. Malformed payloads are
    /// treated as "no event"; a bad transaction never affects its siblings.
    pub fn classify(&self, tx: &ObservedTx, price: PriceSnapshot) -> Option<WhaleEvent> {
        if tx.input.is_empty() && !tx.value.is_zero() {
            return self.classify_native(tx, price);
        }
        self.classify_token(tx)
    }

    fn classify_native(&self, tx: &ObservedTx, price: PriceSnapshot) -> Option<WhaleEvent> {
        let to = tx.to?;
        let amount_eth = wei_to_eth(tx.value);
        let value_usd = amount_eth * price.usd;
        if value_usd < self.min_value_usd {
            return None;
        }
        Some(WhaleEvent::NativeTransfer {
            amount_eth,
            value_usd,
            from: tx.from,
            to,
            hash: tx.hash,
            block: tx.block,
        })
    }

    fn classify_token(&self, tx: &ObservedTx) -> Option<WhaleEvent> {
        if !tx.input.starts_with(&TRANSFER_SELECTOR) {
            return None;
        }
        let token = tx.to?;
        if !self.watched_tokens.contains(&token) {
            return None;
        }
        let raw_amount = decode_transfer_amount(&tx.input)?;
        Some(WhaleEvent::TokenTransfer {
            token,
            raw_amount,
            from: tx.from,
            to: token,
            hash: tx.hash,
            block: tx.block,
        })
    }
}

fn decode_transfer_amount(input: &[u8]) -> Option<U256> {
    let word = input.get(AMOUNT_WORD)?;
    Some(U256::from_be_slice(word))
}

fn wei_to_eth(value: U256) -> f64 {
    // format_ether keeps the full 256-bit precision; the f64 rounding
    // happens only at the final conversion step.
    format_ether(value).parse().unwrap_or(0.0)
}
