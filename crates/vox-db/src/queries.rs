//! Row-level query functions organized by table.
//!
//! Balance columns are never written here; the ledger owns them.

pub mod clips;
pub mod outbox;
pub mod payouts;
pub mod profiles;
pub mod rates;
pub mod votes;
