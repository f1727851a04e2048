//! Background scheduling
//!
//! Cron-driven renewal sweep keeping webhook subscriptions alive.

pub mod error;
pub mod renewal_scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use renewal_scheduler::{RenewalScheduler, RenewalSchedulerConfig};
