//! Mural registry — the configuration-driven table of active murals.
//!
//! DESIGN
//! ======
//! Pure mapping, no mutable state: a mural id resolves to its topic
//! namespace and its key prefix in the chunk store, or to an error. Unknown
//! murals are never defaulted into some shared space — a client asking for a
//! mural this process does not serve gets a hard error.

use std::collections::BTreeSet;

use protocol::envelope::ErrorCode;

use crate::store;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown mural: {0}")]
    UnknownMural(u32),
}

impl ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownMural(_) => "E_UNKNOWN_MURAL",
        }
    }
}

/// Namespace owned by one mural: its topic space and its slice of the
/// shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuralNamespace {
    pub topic_prefix: String,
    pub key_prefix: String,
}

#[derive(Debug)]
pub struct MuralRegistry {
    murals: BTreeSet<u32>,
}

impl MuralRegistry {
    #[must_use]
    pub fn new(murals: &[u32]) -> Self {
        Self { murals: murals.iter().copied().collect() }
    }

    /// Resolve a mural id to its namespaces.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMural` for ids outside the configured table.
    pub fn resolve(&self, mural: u32) -> Result<MuralNamespace, RegistryError> {
        if !self.murals.contains(&mural) {
            return Err(RegistryError::UnknownMural(mural));
        }
        Ok(MuralNamespace {
            topic_prefix: format!("mural_{mural}"),
            key_prefix: store::key_prefix(mural),
        })
    }

    #[must_use]
    pub fn contains(&self, mural: u32) -> bool {
        self.murals.contains(&mural)
    }

    /// Ids served by this process, ascending.
    #[must_use]
    pub fn murals(&self) -> Vec<u32> {
        self.murals.iter().copied().collect()
    }
}
