//! Outcome types for write operations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Success flag plus a human readable message, returned by operations with
/// a yes/no outcome (insert, update, delete, dataset creation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        write!(f, "[{status}] {}", self.message)
    }
}

/// Summary of a multi-row write. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOperationResult {
    pub total_items: usize,
    pub successful: usize,
    pub failed: usize,
    /// `(item_id, error_message)` in submission order
    pub error_details: Vec<(String, String)>,
}

impl BatchOperationResult {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.successful += 1;
    }

    pub fn record_failure(&mut self, item_id: impl Into<String>, message: impl Into<String>) {
        self.failed += 1;
        self.error_details.push((item_id.into(), message.into()));
    }

    /// Fraction of items written, in `0.0..=1.0`. An empty batch reports 0.
    pub fn success_rate(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_items as f64
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.successful == self.total_items
    }
}

impl fmt::Display for BatchOperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}/{} succeeded ({:.1}%), {} failed",
            self.successful,
            self.total_items,
            self.success_rate() * 100.0,
            self.failed
        )?;
        for (item, message) in &self.error_details {
            writeln!(f, "- {item}: {message}")?;
        }
        Ok(())
    }
}
