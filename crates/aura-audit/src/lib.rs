//! # aura-audit: Tamper-Evident Audit Trail
//!
//! Every entry carries a monotonic sequence number and a hash over its own
//! canonical fields chained to the previous entry's hash, starting from
//! [`aura_core::GENESIS_HASH`]. Editing, reordering or deleting any stored
//! entry breaks [`verify_chain`].
//!
//! Sensitive metadata keys are replaced with [`REDACTED`] before an entry
//! is hashed, so the original value never reaches any store.
//!
//! Entries are buffered and committed in batches; call
//! [`AuditLogger::flush`] before shutdown.

pub mod entry;
pub mod error;
pub mod export;
pub mod integrity;
pub mod logger;
pub mod redact;
pub mod store;

pub use entry::{AuditCategory, AuditEntry, AuditEvent, AuditOutcome, AuditSeverity};
pub use error::AuditError;
pub use export::{export, ExportFormat};
pub use integrity::{verify_chain, verify_integrity, ChainViolation};
pub use logger::{AuditConfig, AuditFilter, AuditLogger, VerificationAttempt};
pub use redact::{Redactor, DEFAULT_SENSITIVE_KEYS, REDACTED};
pub use store::{parse_json_lines, AuditStore, JsonLinesAuditStore, MemoryAuditStore};
