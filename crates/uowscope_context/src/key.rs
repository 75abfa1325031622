//! Ambient slot keys.

use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// Identifier of one ambient slot in a [`crate::ScopeStore`].
///
/// Keys are opaque. The well-known keys returned by [`ScopeKey::read_write`]
/// and [`ScopeKey::read_only`] are generated on first use and stay the same
/// for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeKey(Uuid);

impl ScopeKey {
    /// Creates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a key from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Slot of the ambient read-write scope.
    #[must_use]
    pub fn read_write() -> Self {
        static KEY: OnceLock<ScopeKey> = OnceLock::new();
        *KEY.get_or_init(Self::generate)
    }

    /// Slot of the ambient read-only scope.
    #[must_use]
    pub fn read_only() -> Self {
        static KEY: OnceLock<ScopeKey> = OnceLock::new();
        *KEY.get_or_init(Self::generate)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeKey({})", self.0)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_keys_are_stable() {
        assert_eq!(ScopeKey::read_write(), ScopeKey::read_write());
        assert_eq!(ScopeKey::read_only(), ScopeKey::read_only());
    }

    #[test]
    fn read_write_and_read_only_are_independent() {
        assert_ne!(ScopeKey::read_write(), ScopeKey::read_only());
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(ScopeKey::generate(), ScopeKey::generate());
    }

    #[test]
    fn display_prefix() {
        let key = ScopeKey::from_uuid(Uuid::nil());
        assert_eq!(
            format!("{key}"),
            "key:00000000-0000-0000-0000-000000000000"
        );
    }
}
