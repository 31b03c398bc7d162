// src/core/guard.rs

//! Write-Path Guard (C7): the single choke point SQL, parameter batches, and
//! scripts pass through before they reach an executor. Order of checks is
//! fixed — split-brain, then role, then execution — and no statement ever
//! runs before both checks clear.

use crate::core::errors::LiteFsError;
use crate::core::role::RoleResolver;
use crate::core::sql::{self, classify_script};
use crate::ports::SplitBrainSource;
use crate::ports::StatementExecutor;
use std::collections::HashMap;
use std::sync::Arc;

pub struct WritePathGuard {
    role: Arc<RoleResolver>,
    split_brain: Option<Arc<dyn SplitBrainSource>>,
    executor: Arc<dyn StatementExecutor>,
}

impl WritePathGuard {
    pub fn new(role: Arc<RoleResolver>, executor: Arc<dyn StatementExecutor>) -> Self {
        Self {
            role,
            split_brain: None,
            executor,
        }
    }

    /// The split-brain check is skipped entirely when no detector is wired
    /// (§4.7 "Optional detector"); the primary/replica check still runs.
    pub fn with_split_brain_detector(
        role: Arc<RoleResolver>,
        executor: Arc<dyn StatementExecutor>,
        detector: Arc<dyn SplitBrainSource>,
    ) -> Self {
        Self {
            role,
            split_brain: Some(detector),
            executor,
        }
    }

    /// Runs one statement. Classification decides whether the guard checks
    /// fire at all — a pure `SELECT` proceeds on a replica unguarded.
    pub async fn execute(
        &self,
        sql_text: &str,
        params: &HashMap<String, String>,
    ) -> Result<u64, LiteFsError> {
        if sql::is_write(sql_text) {
            self.check_write_allowed().await?;
        }
        self.executor.execute(sql_text, params).await
    }

    /// Runs a multi-statement script. Classification is applied to every
    /// statement first; if any is a write, the guard checks run before any
    /// statement in the script is executed (§4.7, §8 property 5).
    pub async fn execute_script(&self, script: &str) -> Result<(), LiteFsError> {
        let classification = classify_script(script);
        if classification.any_write {
            self.check_write_allowed().await?;
        }
        self.executor.execute_script(script).await
    }

    async fn check_write_allowed(&self) -> Result<(), LiteFsError> {
        if let Some(detector) = &self.split_brain {
            if let Some(leaders) = detector.check().await? {
                return Err(LiteFsError::SplitBrain {
                    leader_count: leaders.len(),
                });
            }
        }
        if !self.role.is_primary().await {
            return Err(LiteFsError::NotPrimary);
        }
        Ok(())
    }
}
