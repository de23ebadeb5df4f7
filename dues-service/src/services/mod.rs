//! Services module for dues-service.

pub mod charge_generator;
pub mod clock;
pub mod database;
pub mod debt_ledger;
pub mod engine;
pub mod history;
pub mod memory;
pub mod metrics;
pub mod payment_processor;
pub mod reference_issuer;
pub mod residents;
pub mod store;
pub mod sweeper;

pub use charge_generator::{ChargeGenerator, GenerationFailure, GenerationReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use debt_ledger::{DebtItem, DebtLedger, DebtSummary};
pub use engine::DuesEngine;
pub use history::PaymentHistory;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use payment_processor::{PaymentProcessor, ReferenceDetails};
pub use reference_issuer::{ReferenceIssuer, ReferencePolicy};
pub use residents::ResidentDirectory;
pub use store::DuesStore;
pub use sweeper::ReferenceSweeper;
