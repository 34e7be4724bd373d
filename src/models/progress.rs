// src/models/progress.rs
//! Named pipeline milestones reported to an optional observer.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Points in the registration pipeline a caller may want to surface, e.g. as
/// a progress bar in the registration UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    TemplateDecoded,
    SecretHashed,
    KeypairDerived,
    DidReady,
    TxSubmitted,
    TxConfirmed,
}

impl Milestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::TemplateDecoded => "template_decoded",
            Milestone::SecretHashed => "secret_hashed",
            Milestone::KeypairDerived => "keypair_derived",
            Milestone::DidReady => "did_ready",
            Milestone::TxSubmitted => "tx_submitted",
            Milestone::TxConfirmed => "tx_confirmed",
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked at each milestone. Cloning shares the same callback.
#[derive(Clone, Default)]
pub struct ProgressSink {
    callback: Option<Arc<dyn Fn(Milestone) + Send + Sync>>,
}

impl ProgressSink {
    /// A sink that drops every milestone.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(callback: impl Fn(Milestone) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn emit(&self, milestone: Milestone) {
        if let Some(callback) = &self.callback {
            callback(milestone);
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}
