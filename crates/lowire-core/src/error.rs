// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Terminal loop failures.  The display strings are part of the public
/// contract; downstream consumers match on them.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Budget tokens {0} exhausted")]
    BudgetExhausted(u64),

    #[error("Failed to perform step, max attempts reached")]
    MaxAttemptsReached,

    #[error("Cache missing but LOWIRE_FORCE_CACHE is set")]
    CacheMiss,
}
