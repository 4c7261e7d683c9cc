//! End-to-end scenarios across the chain plumbing and the settlement layer.
//!
//! Each test wires a `MockChain`, a `MemoryStore`, a `MemoryLedger` and the
//! real scanners, then drives the ledger history forward and checks what the
//! game side ends up with: request states, balances, notifications, and
//! checkpoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use paygate_chain::{ChainRegistry, EventScanner, MockChain, TxStatus};
use paygate_settlement::{
    ActionRegistry, CurrencyLedger, FixedRateOracle, MemoryLedger, Notification, PaymentAuthority,
    SessionRegistry, StaticCatalog, WithdrawalLedger,
};
use paygate_store::{CheckpointStore, MemoryStore, SettlementErrorLog, WithdrawalStore};
use paygate_types::*;

const PLAYER_WALLET: &str = "0x00000000000000000000000000000000000000cc";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Helper: one game server wired to one mock chain.
struct Game {
    chain: Arc<MockChain>,
    chains: Arc<ChainRegistry>,
    store: Arc<MemoryStore>,
    ledger: Arc<MemoryLedger>,
    sessions: Arc<SessionRegistry>,
    authority: Arc<PaymentAuthority>,
    withdrawals: Arc<WithdrawalLedger>,
    fulfilled: Arc<AtomicUsize>,
}

impl Game {
    async fn new() -> Self {
        init_tracing();
        let chain = Arc::new(MockChain::new("eth"));
        chain.configure_scan(|s| {
            s.confirmations = 2;
            s.window = 10;
            s.genesis = 15;
            s.receipt_poll_interval = Duration::from_millis(2);
        });
        chain.set_head(50);

        let store = Arc::new(MemoryStore::new());
        let mut chains = ChainRegistry::new(store.clone());
        chains.register(chain.clone()).unwrap();
        let chains = Arc::new(chains);

        let fulfilled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fulfilled);
        let mut actions = ActionRegistry::new();
        actions
            .register_action(ProductId::new("gem_pack"), move |f| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "gems": 100, "user": f.user_id }))
                }
            })
            .map_product_to_event(ProductId::new("gem_pack"), "gemsDelivered");

        let ledger = Arc::new(MemoryLedger::new());
        let sessions = Arc::new(SessionRegistry::new());
        let authority = Arc::new(PaymentAuthority::new(
            Arc::clone(&chains),
            store.clone(),
            Arc::new(actions),
            sessions.clone(),
            Arc::new(StaticCatalog::new().with_price(ProductId::new("gem_pack"), 500)),
            Arc::new(FixedRateOracle::new().with_rate(ChainId::new("eth"), d("0.0004"))),
            PaymentConfig::default(),
        ));
        authority.subscribe().await;

        let withdrawals = Arc::new(WithdrawalLedger::new(
            Arc::clone(&chains),
            store.clone(),
            ledger.clone(),
            sessions.clone(),
            WithdrawalConfig::new(ChainId::new("eth")),
        ));
        withdrawals.subscribe().await;

        Self {
            chain,
            chains,
            store,
            ledger,
            sessions,
            authority,
            withdrawals,
            fulfilled,
        }
    }

    fn scanner(&self, kind: EventKind, checkpoints: Arc<dyn CheckpointStore>) -> EventScanner {
        EventScanner::new(
            self.chain.clone(),
            kind,
            checkpoints,
            Arc::clone(self.chains.dispatcher()),
        )
    }

    async fn scan(&self, kind: EventKind) -> Option<u64> {
        self.scanner(kind, self.store.clone())
            .scan_once(&CancellationToken::new())
            .await
            .unwrap()
            .checkpoint
    }

    async fn balance(&self, user: UserId) -> Decimal {
        self.ledger.balance(user, "divs").await.unwrap()
    }

    async fn fund(&self, user: UserId, amount: &str) {
        self.ledger.deposit(user, "divs", d(amount)).await.unwrap();
    }
}

impl Drop for Game {
    fn drop(&mut self) {
        self.chains.shutdown();
    }
}

fn payment_event(id: PaymentId, tx: &str, block: u64) -> EventPayload {
    EventPayload::Payment(PaymentEvent {
        payment_id: id.to_string(),
        transaction_hash: TransactionId::new(tx),
        block_number: block,
        reward_credit: U256::from(1_000_000u64),
    })
}

fn token_withdrawal(success: bool, tx: &TransactionId) -> EventPayload {
    EventPayload::DividendTokenWithdrawal(DividendTokenWithdrawalEvent {
        success,
        to: PLAYER_WALLET.into(),
        amount: U256::from(100_000_000u64),
        timestamp: 1_700_000_000,
        tx: tx.clone(),
    })
}

fn gateway_withdrawal(success: bool, tx: &TransactionId, block: u64) -> EventPayload {
    EventPayload::DividendWithdrawal(DividendWithdrawalEvent {
        success,
        to: PLAYER_WALLET.into(),
        withdrawal_id: "unused".into(),
        amount: U256::from(100_000_000u64),
        block_number: block,
        transaction_hash: tx.clone(),
    })
}

async fn next_event(rx: &mut mpsc::Receiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("notification within 2s")
        .expect("session open")
}

fn shop_order(user: UserId) -> PaymentOrder {
    PaymentOrder {
        user_id: user,
        product_id: ProductId::new("gem_pack"),
        tag: "shop".into(),
        context: json!({ "offer": "weekend" }),
        address: PLAYER_WALLET.into(),
        chain: ChainId::new("eth"),
    }
}

// =====================================================================
// Payments
// =====================================================================

#[tokio::test]
async fn e2e_payment_settles_through_scanner() {
    let game = Game::new().await;
    let user = UserId::new();
    let mut rx = game.sessions.subscribe(user).await;

    let auth = game.authority.request_payment(shop_order(user)).await.unwrap();
    game.chain.push_event(20, payment_event(auth.payment_id, "0xa1", 20));

    // Window [15, 24] carries the event, [25, 34] is empty and ends the cycle.
    assert_eq!(game.scan(EventKind::Payment).await, Some(34));

    assert_eq!(game.fulfilled.load(Ordering::SeqCst), 1);
    let request = game.authority.payment(auth.payment_id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Success);
    assert!(request.claimed);
    assert_eq!(request.block_number, Some(20));

    let note = next_event(&mut rx).await;
    assert_eq!(note.event, "gemsDelivered");
    assert_eq!(note.payload["productId"], "gem_pack");
    assert_eq!(note.payload["result"]["gems"], 100);
}

#[tokio::test]
async fn e2e_paged_scan_advances_cursor_and_masks_redelivery() {
    let game = Game::new().await;
    game.chain.configure_scan(|s| {
        s.mode = ScanMode::Paged;
        s.window = 2;
        s.genesis = 100;
    });
    game.chain.set_head(2000);
    for (cursor, tx) in [(1000, "0xd1"), (1005, "0xd2"), (1010, "0xd3")] {
        let auth = game
            .authority
            .request_payment(shop_order(UserId::new()))
            .await
            .unwrap();
        game.chain
            .push_event(cursor, payment_event(auth.payment_id, tx, cursor));
    }

    // Pages [1000, 1005], [1005, 1010], [1010]: each boundary cursor is
    // delivered twice and the short page ends the cycle.
    let report = game
        .scanner(EventKind::Payment, game.store.clone())
        .scan_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.checkpoint, Some(1010));
    assert_eq!(report.events, 5);
    assert_eq!(game.fulfilled.load(Ordering::SeqCst), 3);

    let again = game
        .scanner(EventKind::Payment, game.store.clone())
        .scan_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.events, 1);
    assert_eq!(again.checkpoint, Some(1010));
    assert_eq!(game.fulfilled.load(Ordering::SeqCst), 3);
    assert!(game.store.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn e2e_lost_checkpoint_redelivery_is_masked() {
    let game = Game::new().await;
    let user = UserId::new();
    let auth = game.authority.request_payment(shop_order(user)).await.unwrap();
    game.chain.push_event(18, payment_event(auth.payment_id, "0xb2", 18));

    game.scan(EventKind::Payment).await;
    assert_eq!(game.fulfilled.load(Ordering::SeqCst), 1);

    // A scanner that lost its checkpoint replays history from genesis.
    let fresh: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let report = game
        .scanner(EventKind::Payment, fresh)
        .scan_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.events, 1);
    assert_eq!(game.fulfilled.load(Ordering::SeqCst), 1);
    assert!(game.store.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn e2e_checkpoint_is_monotonic() {
    let game = Game::new().await;
    let mut last = None;
    for head in [20, 30, 30, 45, 60] {
        game.chain.set_head(head);
        let checkpoint = game.scan(EventKind::Payment).await;
        assert!(checkpoint >= last, "{checkpoint:?} < {last:?}");
        last = checkpoint;
    }

    // A failing cycle leaves the checkpoint where it was.
    game.chain.fail_next_fetches(1);
    game.chain.set_head(100);
    let failed = game
        .scanner(EventKind::Payment, game.store.clone())
        .scan_once(&CancellationToken::new())
        .await;
    assert!(failed.is_err());
    let stored = game
        .store
        .load_checkpoint(&ChainId::new("eth"), EventKind::Payment)
        .await
        .unwrap()
        .map(|cp| cp.last_scan);
    assert_eq!(stored, last);
}

#[tokio::test]
async fn e2e_event_for_unknown_payment_is_logged_not_thrown() {
    let game = Game::new().await;
    game.chain.push_event(16, payment_event(PaymentId::new(), "0xc3", 16));

    assert_eq!(game.scan(EventKind::Payment).await, Some(34));
    let entries = game.store.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event, EventKind::Payment);
    assert_eq!(entries[0].transaction_id, Some(TransactionId::new("0xc3")));
    assert_eq!(game.fulfilled.load(Ordering::SeqCst), 0);
}

// =====================================================================
// Withdrawals
// =====================================================================

#[tokio::test]
async fn e2e_withdrawal_confirmed_on_chain() {
    let game = Game::new().await;
    let user = UserId::new();
    let mut rx = game.sessions.subscribe(user).await;
    game.fund(user, "150").await;

    let auth = game
        .withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("100"))
        .await
        .unwrap();
    assert_eq!(game.balance(user).await, d("50"));
    let waiting = game.withdrawals.active_withdrawal(user).await.unwrap().unwrap();
    assert_eq!(waiting.status, RequestStatus::WaitingForTx);
    assert_eq!(waiting.id, auth.withdrawal_id);

    let pending = game
        .withdrawals
        .accept_transaction(user, "0xsignedwithdrawal")
        .await
        .unwrap();
    let tx = MockChain::transaction_id_for("0xsignedwithdrawal");
    assert_eq!(pending.status, RequestStatus::Pending);
    assert_eq!(pending.transaction_id, Some(tx.clone()));

    game.chain.push_event(21, token_withdrawal(true, &tx));
    game.scan(EventKind::DividendTokenWithdrawal).await;

    let done = game
        .store
        .find_withdrawal_by_transaction(&tx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, RequestStatus::Success);
    assert_eq!(game.balance(user).await, d("50"));
    assert_eq!(next_event(&mut rx).await.event, "withdrawalSuccess");

    // Redelivery changes nothing.
    game.chains
        .dispatcher()
        .dispatch(&ChainEvent::new(
            ChainId::new("eth"),
            21,
            token_withdrawal(true, &tx),
        ))
        .await
        .unwrap();
    assert_eq!(game.balance(user).await, d("50"));
    assert!(game.withdrawals.active_withdrawal(user).await.unwrap().is_none());
}

#[tokio::test]
async fn e2e_withdrawal_broadcast_rejected_refunds() {
    let game = Game::new().await;
    let user = UserId::new();
    let mut rx = game.sessions.subscribe(user).await;
    game.fund(user, "150").await;

    game.withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("100"))
        .await
        .unwrap();
    game.chain.reject_next_send("insufficient funds for gas");

    let err = game
        .withdrawals
        .accept_transaction(user, "0xsigned")
        .await
        .unwrap_err();
    assert!(matches!(err, PaygateError::TransactionRejected { .. }));
    assert_eq!(game.balance(user).await, d("150"));
    assert!(game.withdrawals.active_withdrawal(user).await.unwrap().is_none());
    let failed = game
        .store
        .withdrawals_with_status(RequestStatus::Failed)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);

    let note = next_event(&mut rx).await;
    assert_eq!(note.event, "withdrawalFailed");
    assert!(
        note.payload["reason"]
            .as_str()
            .unwrap()
            .contains("insufficient funds")
    );

    // The single-flight slot is free again.
    game.withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("100"))
        .await
        .unwrap();
}

#[tokio::test]
async fn e2e_withdrawal_single_flight() {
    let game = Game::new().await;
    let user = UserId::new();
    game.fund(user, "150").await;

    game.withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("100"))
        .await
        .unwrap();
    let err = game
        .withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("10"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaygateError::WithdrawalAlreadyPending(_)));
    assert_eq!(game.balance(user).await, d("50"));
}

#[tokio::test]
async fn e2e_failed_receipt_refunds_exactly_once() {
    let game = Game::new().await;
    let user = UserId::new();
    let mut rx = game.sessions.subscribe(user).await;
    game.fund(user, "150").await;

    game.withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("100"))
        .await
        .unwrap();
    let tx = MockChain::transaction_id_for("0xreverts");
    game.chain.set_tx_status(
        &tx,
        TxStatus::Failed {
            reason: "execution reverted".into(),
        },
    );
    game.withdrawals
        .accept_transaction(user, "0xreverts")
        .await
        .unwrap();

    let note = next_event(&mut rx).await;
    assert_eq!(note.event, "withdrawalFailed");
    assert_eq!(game.balance(user).await, d("150"));

    // The contract's own failure event for the same transaction arrives later.
    game.chain.push_event(22, gateway_withdrawal(false, &tx, 22));
    game.scan(EventKind::DividendWithdrawal).await;
    assert_eq!(game.balance(user).await, d("150"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn e2e_on_chain_failure_event_refunds() {
    let game = Game::new().await;
    let user = UserId::new();
    game.fund(user, "150").await;

    game.withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("100"))
        .await
        .unwrap();
    game.withdrawals
        .accept_transaction(user, "0xsigned")
        .await
        .unwrap();
    let tx = MockChain::transaction_id_for("0xsigned");

    game.chain.push_event(17, gateway_withdrawal(false, &tx, 17));
    game.scan(EventKind::DividendWithdrawal).await;

    let request = game
        .store
        .find_withdrawal_by_transaction(&tx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(game.balance(user).await, d("150"));
}

#[tokio::test]
async fn e2e_withdrawal_recovery_reattaches_trackers() {
    let game = Game::new().await;
    let user = UserId::new();
    game.fund(user, "40").await;
    game.withdrawals
        .request_withdrawal(user, PLAYER_WALLET, d("40"))
        .await
        .unwrap();
    game.withdrawals
        .accept_transaction(user, "0xinflight")
        .await
        .unwrap();

    let report = game.withdrawals.recover().await.unwrap();
    assert_eq!(report.trackers, 1);
    assert_eq!(report.refunds, 0);
    assert_eq!(game.authority.recover().await.unwrap().trackers, 0);
}
