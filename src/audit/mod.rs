//! Tamper-evident audit ledger
//!
//! Per-organization append-only hash chain over audit entries, with
//! canonical serialization, append, and verification.

pub mod canonical;
pub mod entry;
pub mod ledger;
pub mod verify;

pub use canonical::{canonical_bytes, compute_hash, AuditPayload};
pub use entry::{AuditEntry, NewAuditEntry};
pub use ledger::{append, append_entry, count_entries, last_entry, list_entries, max_seq};
pub use verify::{verify_chain, verify_rows, FailureReason, VerificationError, VerificationResult};
