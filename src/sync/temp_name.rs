//! Staging-object names

use crate::rng::{OsRandom, RandomSource};
use crate::storage::{BucketError, BucketResult};
use std::sync::Arc;

/// Draws `prefix` + 16 lowercase hex digits from 64 random bits.
#[derive(Clone)]
pub struct TempNameGenerator {
    prefix: String,
    random: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for TempNameGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempNameGenerator")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl TempNameGenerator {
    pub fn new(prefix: impl Into<String>, random: Arc<dyn RandomSource>) -> Self {
        TempNameGenerator {
            prefix: prefix.into(),
            random,
        }
    }

    /// Generator backed by the OS CSPRNG
    pub fn with_os_random(prefix: impl Into<String>) -> Self {
        Self::new(prefix, Arc::new(OsRandom))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn choose_name(&self) -> BucketResult<String> {
        let x = self
            .random
            .next_u64()
            .map_err(|e| BucketError::Other(format!("ReadFull: {}", e)).annotate("chooseName"))?;
        Ok(format!("{}{:016x}", self.prefix, x))
    }
}
