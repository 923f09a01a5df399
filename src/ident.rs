//! Opaque resource identifier generation.

use std::hash::{DefaultHasher, Hash, Hasher};

use uuid::Uuid;

/// Number of hexadecimal digits in the generated suffix.
const SUFFIX_DIGITS: usize = 12;
const SUFFIX_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Produces candidate identifiers for new resources.
///
/// Candidates are not guaranteed to be unique; callers check them against the
/// store and retry within a bounded number of attempts.
pub trait IdentifierSource: Send + Sync {
    /// Generates a candidate identifier of the form `<prefix>-<suffix>`.
    fn generate(&self, owner_seed: &str, prefix: &str) -> String;
}

/// Default source mixing the owner seed with fresh random entropy.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIdentifiers;

impl IdentifierSource for RandomIdentifiers {
    fn generate(&self, owner_seed: &str, prefix: &str) -> String {
        let mut hasher = DefaultHasher::new();
        owner_seed.hash(&mut hasher);
        Uuid::new_v4().as_u128().hash(&mut hasher);
        let suffix = hasher.finish() & SUFFIX_MASK;
        format!("{prefix}-{suffix:0width$X}", width = SUFFIX_DIGITS)
    }
}
