//! Results of writes to an inference store.
//!
//! A write returns the status changes its whole cascade produced, netted
//! against the state before the write: a fact that is deactivated and then
//! revived within the same cascade appears in neither list.

use serde::{Deserialize, Serialize};

use crate::fact::{FactId, FactInstance};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
  /// Facts that became active, including the asserted one, in id order.
  pub activated:   Vec<FactId>,
  /// Facts that became inactive, including the retracted one, in id order.
  pub deactivated: Vec<FactId>,
}

impl Changes {
  pub fn is_empty(&self) -> bool { self.activated.is_empty() && self.deactivated.is_empty() }
}

/// Outcome of [`InferenceStore::assert_fact`](crate::store::InferenceStore::assert_fact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
  pub fact:    FactInstance,
  pub changes: Changes,
}

/// Outcome of [`InferenceStore::retract_fact`](crate::store::InferenceStore::retract_fact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retraction {
  /// The retracted fact, as it stands after the cascade.
  pub fact:    FactInstance,
  pub changes: Changes,
}
