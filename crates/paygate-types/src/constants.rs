//! System-wide constants for the Paygate settlement engine.

/// Default validity window of a payment authorization, in seconds.
pub const DEFAULT_PAYMENT_DEADLINE_SECS: u64 = 600;

/// Default time one worker may hold a payment's fulfillment, in seconds.
pub const DEFAULT_FULFILLMENT_LEASE_SECS: u64 = 300;

/// Decimal precision of native EVM value (wei).
pub const NATIVE_DECIMALS: u8 = 18;

/// Decimal precision of the reward ("divs") token.
pub const REWARD_TOKEN_DECIMALS: u8 = 6;

/// Largest decimal precision representable in a `u256` scale factor.
pub const MAX_DECIMALS: u8 = 77;

/// Default number of blocks an event must be buried under before it is acted on.
pub const DEFAULT_CONFIRMATIONS: u64 = 12;

/// Default block range fetched per scan window.
pub const DEFAULT_SCAN_WINDOW: u64 = 1_000;

/// Default page size for paged (cursor-based) history APIs.
pub const DEFAULT_PAGE_SIZE: u64 = 200;

/// Default delay between two scan cycles, in milliseconds.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 10_000;

/// Default delay between two receipt polls, in milliseconds.
pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 5_000;

/// Prefix every hex-encoded ledger value starts with.
pub const HEX_PREFIX: &str = "0x";

/// Game currency debited by withdrawals and credited by payments.
pub const DEFAULT_WITHDRAWAL_CURRENCY: &str = "divs";

/// Notification sent when a payment settles and no event is mapped for its product.
pub const PAYMENT_SUCCESS_EVENT: &str = "paymentSuccess";

/// Notification sent when a payment transaction fails on-chain.
pub const PAYMENT_FAILED_EVENT: &str = "paymentFailed";

/// Notification sent when a withdrawal is confirmed on-chain.
pub const WITHDRAWAL_SUCCESS_EVENT: &str = "withdrawalSuccess";

/// Notification sent when a withdrawal fails and its debit is refunded.
pub const WITHDRAWAL_FAILED_EVENT: &str = "withdrawalFailed";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Paygate";
