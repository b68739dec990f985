//! Optimistic concurrency on versioned entities
//!
//! The stored record's generation is the compare-and-swap token. A write
//! carrying version `V > 0` is only accepted while the record's generation
//! is still `V`; the store checks this atomically, so no client-side lock
//! is ever taken. Version `None` or `0` means the entity was never
//! persisted, which relies on generations starting at 1.

use crate::translate::ErrorTranslator;
use kvmap_client::{ClientError, ResultCode};
use kvmap_common::{Error, ExistenceAction, Expiration, GenerationPolicy, StoreKey, WritePolicy};

/// How a save is carried out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// The type has no version field: plain upsert
    Unversioned,
    /// First write of a versioned entity: the key must not exist yet
    Create,
    /// Conditioned update: the stored generation must equal `expected`
    Update { expected: u32 },
}

impl WriteMode {
    /// Pick the mode from the entity's type and current version
    #[must_use]
    pub const fn select(versioned: bool, version: Option<u32>) -> Self {
        match (versioned, version) {
            (false, _) => Self::Unversioned,
            (true, None | Some(0)) => Self::Create,
            (true, Some(expected)) => Self::Update { expected },
        }
    }

    /// Whether a successful write must stamp the entity's version
    #[must_use]
    pub const fn tracks_version(self) -> bool {
        !matches!(self, Self::Unversioned)
    }

    /// Write policy for this mode, derived from `base`
    #[must_use]
    pub fn policy(self, base: &WritePolicy, expiration: Expiration) -> WritePolicy {
        let builder = WritePolicy::builder(base)
            .expiration(expiration)
            .send_key(true);
        let builder = match self {
            Self::Unversioned => builder
                .existence_action(ExistenceAction::Upsert)
                .generation_policy(GenerationPolicy::None),
            Self::Create => builder
                .existence_action(ExistenceAction::CreateOnly)
                .generation_policy(GenerationPolicy::None),
            Self::Update { expected } => builder
                .existence_action(ExistenceAction::ReplaceOnly)
                .generation_policy(GenerationPolicy::ExpectEqual)
                .generation(expected),
        };
        builder.build()
    }

    /// Interpret a failed write.
    ///
    /// On a conditioned update both a generation mismatch and an existing
    /// key mean another writer got there first. Everything else goes
    /// through the regular translator, which reports an existing key on a
    /// first write as a duplicate.
    pub fn translate(
        self,
        err: ClientError,
        key: &StoreKey,
        translator: &dyn ErrorTranslator,
    ) -> Error {
        match (self, err.code) {
            (Self::Update { expected }, ResultCode::GenerationError | ResultCode::KeyExists) => {
                Error::OptimisticLock {
                    key: key.to_string(),
                    message: format!("expected generation {expected}: {}", err.message),
                }
            }
            _ => translator.translate(err, Some(key)),
        }
    }
}
