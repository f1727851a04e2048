//! # CalBridge Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for every collaborator
//! - The event reconciler (pure diff algorithm)
//! - The rate-limited batch processor
//! - The watch channel service and the sync orchestrator
//!
//! ## Architecture Principles
//! - Only depends on `calbridge-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod batch;
pub mod ports;
pub mod reconcile;
pub mod sync;
pub mod watch;

// Re-export specific items to avoid ambiguity
pub use batch::{BatchProcessor, ItemOutcome};
pub use ports::{
    ChannelRepository, CredentialAccessor, EventPage, LedgerRepository, LocalEventStore,
    RemoteCalendar, SyncProfileRepository,
};
pub use reconcile::{reconcile, ReconcilePlan, SyncMode, SyncOperation};
pub use sync::SyncOrchestrator;
pub use watch::WatchChannelService;
