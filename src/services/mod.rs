//! Services module for settlement business logic and PSP integration

pub mod exchange_rate;
pub mod ledger;
pub mod psp_service;
pub mod settlement;

pub use psp_service::{PspService, PspServiceError};
pub use settlement::{SettlementConfig, SettlementEngine, SettlementError};
