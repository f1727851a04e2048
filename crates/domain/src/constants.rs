//! Domain constants shared across crates

/// Users renewed concurrently within one sweep batch
pub const RENEWAL_BATCH_SIZE: usize = 3;

/// Pause between renewal sweep batches, milliseconds
pub const RENEWAL_BATCH_DELAY_MS: u64 = 1_000;

/// How far ahead of expiry the sweep looks: one sweep interval plus margin
pub const RENEWAL_LOOKAHEAD_HOURS: i64 = 2;

/// Lifetime requested when opening a watch channel
pub const CHANNEL_TTL_HOURS: i64 = 24;

/// Attempts per provider operation before the item is recorded as failed
pub const MAX_OPERATION_ATTEMPTS: u32 = 3;
