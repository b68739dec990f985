//! Store failure translation
//!
//! Every store failure passes through an [`ErrorTranslator`] before it
//! reaches the caller, so nothing store-specific leaks past the template.

use kvmap_client::{ClientError, ResultCode};
use kvmap_common::{Error, StoreKey};

/// Maps store failures onto the store-agnostic taxonomy
pub trait ErrorTranslator: Send + Sync {
    /// Translate `err`, raised while operating on `key` (if any)
    fn translate(&self, err: ClientError, key: Option<&StoreKey>) -> Error;
}

/// Code-based translation with no state
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultErrorTranslator;

impl ErrorTranslator for DefaultErrorTranslator {
    fn translate(&self, err: ClientError, key: Option<&StoreKey>) -> Error {
        let key = key.map_or_else(|| "-".to_string(), ToString::to_string);
        match err.code {
            ResultCode::KeyExists => Error::DuplicateKey { key },
            ResultCode::KeyNotFound => Error::KeyNotFound { key },
            ResultCode::GenerationError => Error::OptimisticLock {
                key,
                message: err.message,
            },
            ResultCode::Timeout => Error::Timeout,
            // Unknown codes keep the original code for diagnostics
            code => Error::store(code.code(), err.message),
        }
    }
}
