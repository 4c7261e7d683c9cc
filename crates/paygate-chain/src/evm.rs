//! EVM chain adapter.
//!
//! Talks JSON-RPC through an alloy [`DynProvider`]. The gateway contract
//! emits `Payment` and `DividendWithdrawal`; the reward token emits
//! `DividendTokenWithdrawal`. Both expose `nonces(address)` counters that
//! signed authorizations must quote.

use std::str::FromStr;

use alloy::consensus::{Eip658Value, TxReceipt};
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Log;
use alloy::sol;
use async_trait::async_trait;
use tracing::{debug, info};

use paygate_types::{
    ChainConfig, ChainEvent, ChainId, DividendTokenWithdrawalEvent, DividendWithdrawalEvent,
    EventKind, EventPayload, PaygateError, PaymentEvent, Result, ScanRange, TransactionId, U256,
    constants::HEX_PREFIX,
};

use crate::adapter::{ChainAdapter, ScanSettings, TxStatus};
use crate::encoding::{self, AuthoritySigner, SignValue};

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    contract PaymentGateway {
        event Payment(string paymentId, uint256 divs);
        event DividendWithdrawal(bool success, address indexed to, string withdrawalId, uint256 amount);

        function nonces(address owner) external view returns (uint256);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    contract DividendToken {
        event DividendTokenWithdrawal(bool success, address indexed to, uint256 amount, uint256 timestamp);

        function nonces(address owner) external view returns (uint256);
    }
}

/// Builder for [`EvmAdapter`].
#[derive(Debug)]
pub struct EvmAdapterBuilder {
    config: ChainConfig,
    signer: Option<AuthoritySigner>,
}

impl EvmAdapterBuilder {
    /// Use this key instead of reading `config.signer_key_env`.
    #[must_use]
    pub fn signer(mut self, signer: AuthoritySigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Connect and check that the node serves the configured network.
    pub async fn build(self) -> Result<EvmAdapter> {
        let config = self.config;
        config.validate()?;
        let signer = match self.signer {
            Some(signer) => signer,
            None => AuthoritySigner::from_env(&config.signer_key_env)?,
        };
        let gateway = parse_contract(&config.gateway_address)?;
        let reward_token = parse_contract(&config.reward_token_address)?;

        let provider = ProviderBuilder::new()
            .connect(&config.rpc_url)
            .await
            .map_err(|e| PaygateError::rpc(&config.id, format!("connect {}: {e}", config.rpc_url)))?
            .erased();

        let remote = provider
            .get_chain_id()
            .await
            .map_err(|e| PaygateError::rpc(&config.id, e))?;
        if remote != config.network_id {
            return Err(PaygateError::Configuration(format!(
                "chain {}: node reports network {remote}, expected {}",
                config.id, config.network_id
            )));
        }

        info!(
            chain = %config.id,
            network_id = remote,
            signer = %signer.address(),
            gateway = %gateway,
            "EVM adapter initialized"
        );

        Ok(EvmAdapter {
            chain: config.id.clone(),
            provider,
            signer,
            gateway_label: gateway.to_checksum(None),
            gateway,
            reward_token_label: reward_token.to_checksum(None),
            reward_token,
            settings: ScanSettings::from(&config),
            native_decimals: config.native_decimals,
            reward_decimals: config.reward_decimals,
        })
    }
}

fn parse_contract(value: &str) -> Result<Address> {
    if !encoding::is_address(value) {
        return Err(PaygateError::InvalidAddress(value.to_string()));
    }
    Address::from_str(value).map_err(|e| PaygateError::InvalidAddress(format!("{value}: {e}")))
}

/// Adapter for one EVM network.
pub struct EvmAdapter {
    chain: ChainId,
    provider: DynProvider,
    signer: AuthoritySigner,
    gateway: Address,
    gateway_label: String,
    reward_token: Address,
    reward_token_label: String,
    settings: ScanSettings,
    native_decimals: u8,
    reward_decimals: u8,
}

impl EvmAdapter {
    #[must_use]
    pub fn builder(config: ChainConfig) -> EvmAdapterBuilder {
        EvmAdapterBuilder {
            config,
            signer: None,
        }
    }

    fn decode_err(&self, reason: impl Into<String>) -> PaygateError {
        PaygateError::EventDecode {
            chain: self.chain.clone(),
            reason: reason.into(),
        }
    }

    async fn payment_events(&self, range: ScanRange) -> Result<Vec<ChainEvent>> {
        let gateway = PaymentGateway::new(self.gateway, self.provider.clone());
        let logs = gateway
            .Payment_filter()
            .from_block(range.from)
            .to_block(range.to)
            .query()
            .await
            .map_err(|e| PaygateError::rpc(&self.chain, e))?;
        logs.into_iter()
            .map(|(event, log)| payment_event(&self.chain, &event, &log))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.decode_err("Payment log without position"))
    }

    async fn dividend_events(&self, range: ScanRange) -> Result<Vec<ChainEvent>> {
        let gateway = PaymentGateway::new(self.gateway, self.provider.clone());
        let logs = gateway
            .DividendWithdrawal_filter()
            .from_block(range.from)
            .to_block(range.to)
            .query()
            .await
            .map_err(|e| PaygateError::rpc(&self.chain, e))?;
        logs.into_iter()
            .map(|(event, log)| dividend_event(&self.chain, &event, &log))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.decode_err("DividendWithdrawal log without position"))
    }

    async fn token_events(&self, range: ScanRange) -> Result<Vec<ChainEvent>> {
        let token = DividendToken::new(self.reward_token, self.provider.clone());
        let logs = token
            .DividendTokenWithdrawal_filter()
            .from_block(range.from)
            .to_block(range.to)
            .query()
            .await
            .map_err(|e| PaygateError::rpc(&self.chain, e))?;
        logs.into_iter()
            .map(|(event, log)| token_event(&self.chain, &event, &log))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.decode_err("DividendTokenWithdrawal log without position"))
    }
}

/// Transaction hash and block number of a mined log.
fn position(log: &Log) -> Option<(TransactionId, u64)> {
    let tx = log.transaction_hash?;
    let block = log.block_number?;
    Some((TransactionId::new(tx.to_string()), block))
}

fn payment_event(chain: &ChainId, event: &PaymentGateway::Payment, log: &Log) -> Option<ChainEvent> {
    let (tx, block) = position(log)?;
    Some(ChainEvent::new(
        chain.clone(),
        block,
        EventPayload::Payment(PaymentEvent {
            payment_id: event.paymentId.clone(),
            transaction_hash: tx,
            block_number: block,
            reward_credit: event.divs,
        }),
    ))
}

fn dividend_event(
    chain: &ChainId,
    event: &PaymentGateway::DividendWithdrawal,
    log: &Log,
) -> Option<ChainEvent> {
    let (tx, block) = position(log)?;
    Some(ChainEvent::new(
        chain.clone(),
        block,
        EventPayload::DividendWithdrawal(DividendWithdrawalEvent {
            success: event.success,
            to: event.to.to_checksum(None),
            withdrawal_id: event.withdrawalId.clone(),
            amount: event.amount,
            block_number: block,
            transaction_hash: tx,
        }),
    ))
}

fn token_event(
    chain: &ChainId,
    event: &DividendToken::DividendTokenWithdrawal,
    log: &Log,
) -> Option<ChainEvent> {
    let (tx, block) = position(log)?;
    Some(ChainEvent::new(
        chain.clone(),
        block,
        EventPayload::DividendTokenWithdrawal(DividendTokenWithdrawalEvent {
            success: event.success,
            to: event.to.to_checksum(None),
            amount: event.amount,
            timestamp: u64::try_from(event.timestamp).unwrap_or(u64::MAX),
            tx,
        }),
    ))
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_id(&self) -> &ChainId {
        &self.chain
    }

    fn gateway_address(&self) -> &str {
        &self.gateway_label
    }

    fn reward_token_address(&self) -> &str {
        &self.reward_token_label
    }

    fn native_decimals(&self) -> u8 {
        self.native_decimals
    }

    fn reward_decimals(&self) -> u8 {
        self.reward_decimals
    }

    fn scan_settings(&self) -> ScanSettings {
        self.settings
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
        let raw = signed.trim();
        let raw = raw.strip_prefix(HEX_PREFIX).unwrap_or(raw);
        let bytes = hex::decode(raw).map_err(|e| PaygateError::TransactionRejected {
            chain: self.chain.clone(),
            reason: format!("malformed raw transaction: {e}"),
        })?;
        let pending = self
            .provider
            .send_raw_transaction(&bytes)
            .await
            .map_err(|e| PaygateError::TransactionRejected {
                chain: self.chain.clone(),
                reason: e.to_string(),
            })?;
        let tx = TransactionId::new(pending.tx_hash().to_string());
        info!(chain = %self.chain, tx = %tx, "transaction broadcast");
        Ok(tx)
    }

    async fn payment_nonce(&self, address: &str) -> Result<U256> {
        let owner = Address::from_str(address)
            .map_err(|e| PaygateError::InvalidAddress(format!("{address}: {e}")))?;
        PaymentGateway::new(self.gateway, self.provider.clone())
            .nonces(owner)
            .call()
            .await
            .map_err(|e| PaygateError::rpc(&self.chain, e))
    }

    async fn dividend_token_nonce(&self, address: &str) -> Result<U256> {
        let owner = Address::from_str(address)
            .map_err(|e| PaygateError::InvalidAddress(format!("{address}: {e}")))?;
        DividendToken::new(self.reward_token, self.provider.clone())
            .nonces(owner)
            .call()
            .await
            .map_err(|e| PaygateError::rpc(&self.chain, e))
    }

    async fn head(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| PaygateError::rpc(&self.chain, e))
    }

    async fn fetch_events(&self, kind: EventKind, range: ScanRange) -> Result<Vec<ChainEvent>> {
        debug!(chain = %self.chain, event = %kind, from = range.from, to = range.to, "eth_getLogs");
        match kind {
            EventKind::Payment => self.payment_events(range).await,
            EventKind::DividendWithdrawal => self.dividend_events(range).await,
            EventKind::DividendTokenWithdrawal => self.token_events(range).await,
            // Derived from receipts by the tracker; never logged on-chain.
            EventKind::TransactionFailed => Ok(Vec::new()),
        }
    }

    async fn transaction_status(&self, tx: &TransactionId) -> Result<TxStatus> {
        let Ok(hash) = B256::from_str(tx.as_str()) else {
            return Ok(TxStatus::Failed {
                reason: format!("malformed transaction hash {tx}"),
            });
        };
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| PaygateError::rpc(&self.chain, e))?;
        Ok(receipt.map_or(TxStatus::Unknown, |r| {
            receipt_outcome(r.inner.status_or_post_state(), r.block_number)
        }))
    }
}

/// Only an explicit EIP-658 success counts; a pre-Byzantium post-state root
/// carries no result and is treated as a failure.
fn receipt_outcome(status: Eip658Value, block: Option<u64>) -> TxStatus {
    let block = block.unwrap_or_default();
    match status {
        Eip658Value::Eip658(true) => TxStatus::Succeeded,
        Eip658Value::Eip658(false) => TxStatus::Failed {
            reason: format!("reverted in block {block}"),
        },
        Eip658Value::PostState(_) => TxStatus::Failed {
            reason: format!("receipt in block {block} has no status"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::LogData;
    use alloy::sol_types::SolEvent;

    fn mined(data: LogData, block: Option<u64>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::ZERO,
                data,
            },
            block_number: block,
            transaction_hash: Some(B256::repeat_byte(0xab)),
            ..Default::default()
        }
    }

    #[test]
    fn event_signatures_match_contracts() {
        assert_eq!(PaymentGateway::Payment::SIGNATURE, "Payment(string,uint256)");
        assert_eq!(
            PaymentGateway::DividendWithdrawal::SIGNATURE,
            "DividendWithdrawal(bool,address,string,uint256)"
        );
        assert_eq!(
            DividendToken::DividendTokenWithdrawal::SIGNATURE,
            "DividendTokenWithdrawal(bool,address,uint256,uint256)"
        );
    }

    #[test]
    fn payment_log_becomes_domain_event() {
        let event = PaymentGateway::Payment {
            paymentId: "0190c0de-0000-7000-8000-000000000001".into(),
            divs: U256::from(2_500_000u64),
        };
        let log = mined(event.encode_log_data(), Some(42));
        let chain = ChainId::new("eth");
        let decoded = payment_event(&chain, &event, &log).unwrap();
        assert_eq!(decoded.cursor, 42);
        let EventPayload::Payment(p) = decoded.payload else {
            panic!("wrong payload");
        };
        assert_eq!(p.payment_id, "0190c0de-0000-7000-8000-000000000001");
        assert_eq!(p.reward_credit, U256::from(2_500_000u64));
        assert_eq!(p.transaction_hash.as_str(), format!("0x{}", "ab".repeat(32)));
    }

    #[test]
    fn pending_logs_are_rejected() {
        let event = DividendToken::DividendTokenWithdrawal {
            success: true,
            to: Address::repeat_byte(1),
            amount: U256::from(1u64),
            timestamp: U256::from(1_700_000_000u64),
        };
        let log = mined(event.encode_log_data(), None);
        assert!(token_event(&ChainId::new("eth"), &event, &log).is_none());
        let log = mined(event.encode_log_data(), Some(9));
        let decoded = token_event(&ChainId::new("eth"), &event, &log).unwrap();
        let EventPayload::DividendTokenWithdrawal(t) = decoded.payload else {
            panic!("wrong payload");
        };
        assert_eq!(t.timestamp, 1_700_000_000);
        assert!(t.success);
    }

    #[test]
    fn receipt_without_status_is_a_failure() {
        assert_eq!(
            receipt_outcome(Eip658Value::Eip658(true), Some(5)),
            TxStatus::Succeeded
        );
        assert_eq!(
            receipt_outcome(Eip658Value::Eip658(false), Some(5)),
            TxStatus::Failed {
                reason: "reverted in block 5".into()
            }
        );
        assert!(matches!(
            receipt_outcome(Eip658Value::PostState(B256::repeat_byte(1)), None),
            TxStatus::Failed { .. }
        ));
    }

    #[test]
    fn contract_addresses_are_validated() {
        assert!(parse_contract("0x00000000000000000000000000000000000000aa").is_ok());
        assert!(parse_contract("0xnope").is_err());
    }
}
