//! Scriptable in-memory ledger for tests.
//!
//! Signing is real (a fixed development key), everything else is scripted:
//! the head, the event history, nonces, broadcast outcomes and receipt
//! sequences.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy::primitives::keccak256;
use async_trait::async_trait;

use paygate_types::{
    ChainConfig, ChainEvent, ChainId, EventKind, EventPayload, PaygateError, Result, ScanRange,
    TransactionId, U256,
};

use crate::adapter::{ChainAdapter, ScanSettings, TxStatus};
use crate::encoding::{self, AuthoritySigner, SignValue};

/// Well-known development key; never holds funds.
pub const MOCK_SIGNER_KEY: &str =
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const MOCK_GATEWAY: &str = "0x0000000000000000000000000000000000001000";
pub const MOCK_REWARD_TOKEN: &str = "0x0000000000000000000000000000000000002000";

struct MockState {
    settings: ScanSettings,
    head: u64,
    events: Vec<ChainEvent>,
    fetched: Vec<ScanRange>,
    fetch_failures: usize,
    nonce_failures: usize,
    payment_nonces: HashMap<String, U256>,
    token_nonces: HashMap<String, U256>,
    rejections: VecDeque<String>,
    sent: Vec<String>,
    receipts: HashMap<TransactionId, VecDeque<TxStatus>>,
    polls: HashMap<TransactionId, usize>,
}

pub struct MockChain {
    chain: ChainId,
    signer: AuthoritySigner,
    native_decimals: u8,
    reward_decimals: u8,
    state: Mutex<MockState>,
}

impl MockChain {
    /// # Panics
    /// Never: the built-in key is valid.
    #[must_use]
    pub fn new(chain: &str) -> Self {
        let config = ChainConfig::new(
            ChainId::new(chain),
            31_337,
            "http://localhost:8545",
            MOCK_GATEWAY,
            MOCK_REWARD_TOKEN,
        );
        let signer = AuthoritySigner::from_hex(MOCK_SIGNER_KEY).expect("valid development key");
        Self {
            chain: config.id.clone(),
            signer,
            native_decimals: config.native_decimals,
            reward_decimals: config.reward_decimals,
            state: Mutex::new(MockState {
                settings: ScanSettings::from(&config),
                head: 0,
                events: Vec::new(),
                fetched: Vec::new(),
                fetch_failures: 0,
                nonce_failures: 0,
                payment_nonces: HashMap::new(),
                token_nonces: HashMap::new(),
                rejections: VecDeque::new(),
                sent: Vec::new(),
                receipts: HashMap::new(),
                polls: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn configure_scan(&self, f: impl FnOnce(&mut ScanSettings)) {
        f(&mut self.state().settings);
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Append an event at `cursor`, keeping history ordered by cursor.
    pub fn push_event(&self, cursor: u64, payload: EventPayload) {
        let event = ChainEvent::new(self.chain.clone(), cursor, payload);
        let mut state = self.state();
        let at = state.events.partition_point(|e| e.cursor <= cursor);
        state.events.insert(at, event);
    }

    pub fn fetched_ranges(&self) -> Vec<ScanRange> {
        self.state().fetched.clone()
    }

    pub fn fail_next_fetches(&self, n: usize) {
        self.state().fetch_failures = n;
    }

    pub fn fail_next_nonce_lookups(&self, n: usize) {
        self.state().nonce_failures = n;
    }

    pub fn set_payment_nonce(&self, address: &str, nonce: u64) {
        self.state()
            .payment_nonces
            .insert(address.to_ascii_lowercase(), U256::from(nonce));
    }

    pub fn set_token_nonce(&self, address: &str, nonce: u64) {
        self.state()
            .token_nonces
            .insert(address.to_ascii_lowercase(), U256::from(nonce));
    }

    /// The next broadcast is rejected with `reason`.
    pub fn reject_next_send(&self, reason: &str) {
        self.state().rejections.push_back(reason.to_string());
    }

    /// Raw transactions accepted so far.
    pub fn sent_transactions(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Transaction id the mock assigns to a raw transaction.
    #[must_use]
    pub fn transaction_id_for(signed: &str) -> TransactionId {
        TransactionId::new(keccak256(signed.as_bytes()).to_string())
    }

    pub fn set_tx_status(&self, tx: &TransactionId, status: TxStatus) {
        self.set_tx_status_sequence(tx, vec![status]);
    }

    /// Receipt answers in order; the last one repeats.
    pub fn set_tx_status_sequence(&self, tx: &TransactionId, statuses: Vec<TxStatus>) {
        self.state().receipts.insert(tx.clone(), statuses.into());
    }

    pub fn receipt_polls(&self, tx: &TransactionId) -> usize {
        self.state().polls.get(tx).copied().unwrap_or(0)
    }

    fn lookup_nonce(&self, address: &str, token: bool) -> Result<U256> {
        let mut state = self.state();
        if state.nonce_failures > 0 {
            state.nonce_failures -= 1;
            return Err(PaygateError::rpc(&self.chain, "nonce lookup timed out"));
        }
        let table = if token {
            &state.token_nonces
        } else {
            &state.payment_nonces
        };
        Ok(table
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(U256::ZERO))
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    fn chain_id(&self) -> &ChainId {
        &self.chain
    }

    fn gateway_address(&self) -> &str {
        MOCK_GATEWAY
    }

    fn reward_token_address(&self) -> &str {
        MOCK_REWARD_TOKEN
    }

    fn native_decimals(&self) -> u8 {
        self.native_decimals
    }

    fn reward_decimals(&self) -> u8 {
        self.reward_decimals
    }

    fn scan_settings(&self) -> ScanSettings {
        self.state().settings
    }

    fn signer_address(&self) -> String {
        self.signer.address().to_checksum(None)
    }

    fn is_address(&self, value: &str) -> bool {
        encoding::is_address(value)
    }

    fn canonical_address(&self, value: &str) -> Result<String> {
        encoding::canonical_address(value)
    }

    async fn sign(&self, values: &[SignValue]) -> Result<String> {
        self.signer.sign(values).await
    }

    fn verify_sign(&self, nonce: &str, signature: &str, address: &str) -> bool {
        encoding::verify_sign(nonce, signature, address)
    }

    async fn send_transaction(&self, signed: &str) -> Result<TransactionId> {
        let mut state = self.state();
        if let Some(reason) = state.rejections.pop_front() {
            return Err(PaygateError::TransactionRejected {
                chain: self.chain.clone(),
                reason,
            });
        }
        state.sent.push(signed.to_string());
        Ok(Self::transaction_id_for(signed))
    }

    async fn payment_nonce(&self, address: &str) -> Result<U256> {
        self.lookup_nonce(address, false)
    }

    async fn dividend_token_nonce(&self, address: &str) -> Result<U256> {
        self.lookup_nonce(address, true)
    }

    async fn head(&self) -> Result<u64> {
        Ok(self.state().head)
    }

    async fn fetch_events(&self, kind: EventKind, range: ScanRange) -> Result<Vec<ChainEvent>> {
        let mut state = self.state();
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(PaygateError::rpc(&self.chain, "getLogs timed out"));
        }
        state.fetched.push(range);
        let limit = range
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        Ok(state
            .events
            .iter()
            .filter(|e| e.kind() == kind && range.contains(e.cursor))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn transaction_status(&self, tx: &TransactionId) -> Result<TxStatus> {
        let mut state = self.state();
        *state.polls.entry(tx.clone()).or_default() += 1;
        let Some(queue) = state.receipts.get_mut(tx) else {
            return Ok(TxStatus::Unknown);
        };
        let status = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(status.unwrap_or(TxStatus::Unknown))
    }
}
