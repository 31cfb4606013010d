//! The `InferenceStore` trait.
//!
//! Implemented by engines that execute a compiled artifact
//! (e.g. `warrant-store-sqlite`). Callers depend on this abstraction, not on
//! any concrete backend.

use std::future::Future;

use crate::{
  fact::{Explanation, FactId, FactInstance, Justification, NewFact},
  lifecycle::{Activation, Retraction},
};

/// A justification-tracking fact store.
///
/// Only base schemas accept writes. Each write runs its complete cascade
/// atomically: no intermediate state is ever observable.
pub trait InferenceStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Insert a base fact and run every rule it makes eligible to fixpoint.
  fn assert_fact(
    &self,
    fact: NewFact,
  ) -> impl Future<Output = Result<Activation, Self::Error>> + Send + '_;

  /// Deactivate a base fact and cascade through every justification that
  /// names it.
  ///
  /// Returns an error if the fact is derived, unknown, or already retracted.
  fn retract_fact(
    &self,
    id: FactId,
  ) -> impl Future<Output = Result<Retraction, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Retrieve a fact by id. Returns `None` if not found.
  fn get_fact(
    &self,
    id: FactId,
  ) -> impl Future<Output = Result<Option<FactInstance>, Self::Error>> + Send + '_;

  /// All facts of `schema` in sequence order.
  fn facts<'a>(
    &'a self,
    schema: &'a str,
    include_inactive: bool,
  ) -> impl Future<Output = Result<Vec<FactInstance>, Self::Error>> + Send + 'a;

  /// Every justification recorded for a derived fact, valid or not.
  fn justifications(
    &self,
    id: FactId,
  ) -> impl Future<Output = Result<Vec<Justification>, Self::Error>> + Send + '_;

  /// The fact's valid supports, resolved recursively to base facts.
  /// Returns `None` if not found.
  fn explain(
    &self,
    id: FactId,
  ) -> impl Future<Output = Result<Option<Explanation>, Self::Error>> + Send + '_;
}
