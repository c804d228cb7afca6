/*!
 * Quota accounting for rate-limited model endpoints.
 *
 * - `models`: static model descriptors and per-model usage counters
 * - `clock`: injectable time source
 * - `ledger`: the shared, serialized usage ledger and model selector
 */

pub mod clock;
pub mod ledger;
pub mod models;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{LedgerPolicy, QuotaLedger};
pub use models::{ModelDescriptor, ModelUsage};
