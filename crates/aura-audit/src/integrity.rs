//! Hash-chain verification.

use aura_core::GENESIS_HASH;
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::entry::AuditEntry;

/// First break found in a chain.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainViolation {
    /// Sequence numbers are not contiguous.
    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap {
        /// The sequence that should have followed.
        expected: u64,
        /// The sequence actually present.
        found: u64,
    },

    /// An entry does not point at its predecessor's hash.
    #[error("entry {sequence} does not link to its predecessor")]
    BrokenLink {
        /// The entry whose `previous_hash` is wrong.
        sequence: u64,
    },

    /// An entry's stored hash does not match its contents.
    #[error("entry {sequence} hash does not match its contents")]
    HashMismatch {
        /// The altered entry.
        sequence: u64,
    },

    /// An entry could not be re-hashed at all.
    #[error("entry {sequence} cannot be canonicalized")]
    Unhashable {
        /// The offending entry.
        sequence: u64,
    },
}

fn hashes_equal(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Check that `entries` form an unbroken chain.
///
/// Every entry's hash must match its recomputed value, each entry must link
/// to the one before it, and sequences must be contiguous. A slice starting
/// at sequence 0 must also start from the genesis hash; a slice starting
/// later is checked from its first entry onward.
///
/// # Errors
///
/// The first [`ChainViolation`] found.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainViolation> {
    let mut previous: Option<&AuditEntry> = None;
    for entry in entries {
        match previous {
            None => {
                if entry.sequence == 0 && !hashes_equal(&entry.previous_hash, GENESIS_HASH) {
                    return Err(ChainViolation::BrokenLink { sequence: 0 });
                }
            }
            Some(prev) => {
                let expected = prev.sequence.wrapping_add(1);
                if entry.sequence != expected {
                    return Err(ChainViolation::SequenceGap {
                        expected,
                        found: entry.sequence,
                    });
                }
                if !hashes_equal(&entry.previous_hash, &prev.hash) {
                    return Err(ChainViolation::BrokenLink {
                        sequence: entry.sequence,
                    });
                }
            }
        }
        let recomputed = entry.compute_hash().map_err(|_| ChainViolation::Unhashable {
            sequence: entry.sequence,
        })?;
        if !hashes_equal(&recomputed, &entry.hash) {
            return Err(ChainViolation::HashMismatch {
                sequence: entry.sequence,
            });
        }
        previous = Some(entry);
    }
    Ok(())
}

/// True if `entries` form an unbroken chain. See [`verify_chain`].
pub fn verify_integrity(entries: &[AuditEntry]) -> bool {
    match verify_chain(entries) {
        Ok(()) => true,
        Err(violation) => {
            tracing::warn!(%violation, "audit chain verification failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditCategory, AuditEvent, AuditOutcome};
    use aura_core::Timestamp;
    use proptest::prelude::*;

    fn chain(messages: &[String]) -> Vec<AuditEntry> {
        let mut out: Vec<AuditEntry> = Vec::new();
        for (i, msg) in messages.iter().enumerate() {
            let prev = out.last().map_or(GENESIS_HASH.to_string(), |e| e.hash.clone());
            let event = AuditEvent::new(AuditCategory::System, "test", AuditOutcome::Success, msg.clone());
            out.push(AuditEntry::seal(event, i as u64, Timestamp::from_millis(1_000 * i as i64), prev).unwrap());
        }
        out
    }

    fn messages(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("event {i}")).collect()
    }

    #[test]
    fn empty_and_intact_chains_verify() {
        assert!(verify_integrity(&[]));
        assert!(verify_integrity(&chain(&messages(5))));
    }

    #[test]
    fn deletion_is_a_gap() {
        let mut entries = chain(&messages(4));
        entries.remove(2);
        assert_eq!(
            verify_chain(&entries),
            Err(ChainViolation::SequenceGap { expected: 2, found: 3 })
        );
    }

    #[test]
    fn rehashed_tamper_breaks_the_next_link() {
        let mut entries = chain(&messages(3));
        entries[1].message = "forged".into();
        entries[1].hash = entries[1].compute_hash().unwrap();
        assert_eq!(verify_chain(&entries), Err(ChainViolation::BrokenLink { sequence: 2 }));
    }

    #[test]
    fn genesis_must_be_the_seed() {
        let mut entries = chain(&messages(1));
        entries[0].previous_hash = "1".repeat(64);
        assert_eq!(verify_chain(&entries), Err(ChainViolation::BrokenLink { sequence: 0 }));
    }

    #[test]
    fn suffix_slices_verify() {
        let entries = chain(&messages(5));
        assert!(verify_integrity(&entries[2..]));
    }

    proptest! {
        #[test]
        fn any_message_edit_is_detected(
            msgs in proptest::collection::vec("[a-z ]{0,24}", 1..12),
            pick in any::<prop::sample::Index>(),
            suffix in "[a-z]{1,8}",
        ) {
            let mut entries = chain(&msgs);
            prop_assert!(verify_integrity(&entries));
            let i = pick.index(entries.len());
            entries[i].message.push_str(&suffix);
            prop_assert!(!verify_integrity(&entries));
        }
    }
}
