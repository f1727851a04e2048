//! Google Calendar provider adapter

pub mod client;
pub mod wire;

pub use client::GoogleCalendarClient;
