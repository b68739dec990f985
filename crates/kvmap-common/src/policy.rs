//! Write policies
//!
//! A [`WritePolicy`] tells the store how a write must treat an existing
//! record (existence action), whether it is conditioned on the record's
//! generation, which expiration to apply, and whether the user key is
//! stored alongside the record. Policies are immutable once built; derive
//! new ones with [`WritePolicy::builder`].

use crate::types::Expiration;
use serde::{Deserialize, Serialize};

/// How a write treats a record that may or may not already exist
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistenceAction {
    /// Create or merge into an existing record
    #[default]
    Upsert,
    /// Fail if the record does not exist; merge bins otherwise
    UpdateOnly,
    /// Fail if the record does not exist; replace all bins otherwise
    ReplaceOnly,
    /// Fail if the record already exists
    CreateOnly,
}

/// Generation precondition of a write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    /// Write regardless of the stored generation
    #[default]
    None,
    /// Write only if the stored generation equals the expected one
    ExpectEqual,
}

/// Immutable write policy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WritePolicy {
    existence_action: ExistenceAction,
    generation_policy: GenerationPolicy,
    generation: u32,
    expiration: Expiration,
    send_key: bool,
}

impl WritePolicy {
    /// Start a builder seeded with every setting of `base`
    #[must_use]
    pub fn builder(base: &Self) -> WritePolicyBuilder {
        WritePolicyBuilder {
            policy: base.clone(),
        }
    }

    #[must_use]
    pub const fn existence_action(&self) -> ExistenceAction {
        self.existence_action
    }

    #[must_use]
    pub const fn generation_policy(&self) -> GenerationPolicy {
        self.generation_policy
    }

    /// Expected generation; only meaningful with [`GenerationPolicy::ExpectEqual`]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    #[must_use]
    pub const fn expiration(&self) -> Expiration {
        self.expiration
    }

    /// Whether the user key is stored with the record
    #[must_use]
    pub const fn send_key(&self) -> bool {
        self.send_key
    }
}

/// Chainable builder for [`WritePolicy`].
///
/// Performs no validation beyond what the types enforce; combinations
/// that only make sense for some records are chosen by the caller.
#[derive(Clone, Debug)]
pub struct WritePolicyBuilder {
    policy: WritePolicy,
}

impl WritePolicyBuilder {
    #[must_use]
    pub fn existence_action(mut self, action: ExistenceAction) -> Self {
        self.policy.existence_action = action;
        self
    }

    #[must_use]
    pub fn generation_policy(mut self, policy: GenerationPolicy) -> Self {
        self.policy.generation_policy = policy;
        self
    }

    #[must_use]
    pub fn generation(mut self, generation: u32) -> Self {
        self.policy.generation = generation;
        self
    }

    #[must_use]
    pub fn expiration(mut self, expiration: Expiration) -> Self {
        self.policy.expiration = expiration;
        self
    }

    #[must_use]
    pub fn send_key(mut self, send_key: bool) -> Self {
        self.policy.send_key = send_key;
        self
    }

    #[must_use]
    pub fn build(self) -> WritePolicy {
        self.policy
    }
}
