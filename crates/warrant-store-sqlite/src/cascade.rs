//! The truth-maintenance cascade.
//!
//! One [`Cascade`] runs per write, inside that write's transaction. Status
//! changes are queued as events and each event fires the artifact's
//! procedures for its schema and direction until the queue is empty.
//!
//! Deactivation over-deletes: a derived fact losing any justification is
//! deactivated at once and remembered as pending. Once the queue drains,
//! every pending fact that still has a justification whose sources are all
//! active (and unblocked) is revived, which queues its own activation. The
//! two phases alternate until nothing more is revived, so support is always
//! well-founded even where `!distinct` merges made justifications circular.
//! Finally every justification touched along the way has its `valid` flag
//! recomputed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rusqlite::{Connection, OptionalExtension as _, named_params, params_from_iter};
use rusqlite::types::Value as SqlValue;
use warrant_core::{
  fact::{FactId, NewFact},
  lifecycle::{Activation, Changes, Retraction},
  model::DedupMode,
  plan::Effect,
};
use warrant_sql::{Artifact, FactTable, Procedure, RuleInfo, Trigger};

use crate::{Error, Result, encode, read, store::Limits};

#[derive(Debug, Clone, PartialEq, Eq)]
struct FactRef {
  id:     FactId,
  schema: String,
}

#[derive(Debug)]
enum Event {
  /// `fresh` facts were just inserted and take the sequence-bounded join.
  Activated { fact: FactRef, fresh: bool },
  Deactivated(FactRef),
}

pub struct Cascade<'a> {
  conn:     &'a Connection,
  artifact: &'a Artifact,
  limits:   Limits,
  steps:    u64,
  queue:    VecDeque<Event>,
  /// Status before the write of every fact whose status was changed.
  before:   BTreeMap<FactId, (String, bool)>,
  /// Over-deleted facts awaiting re-derivation.
  pending:  BTreeSet<FactId>,
  /// Justifications whose validity is recomputed at the end.
  touched:  BTreeSet<i64>,
}

impl<'a> Cascade<'a> {
  pub fn new(conn: &'a Connection, artifact: &'a Artifact, limits: Limits) -> Self {
    Self {
      conn,
      artifact,
      limits,
      steps: 0,
      queue: VecDeque::new(),
      before: BTreeMap::new(),
      pending: BTreeSet::new(),
      touched: BTreeSet::new(),
    }
  }

  // ─── Writes ────────────────────────────────────────────────────────────────

  pub fn assert(mut self, input: NewFact) -> Result<Activation> {
    let table = read::table(self.artifact, &input.schema)?;
    if table.derived {
      return Err(Error::DerivedSchema(input.schema));
    }
    let values = encode::encode_fields(table, input.values)?;

    let id = self.insert(table, &values)?;
    tracing::trace!(fact = %id, schema = %table.schema, "asserted");
    self.queue.push_back(Event::Activated {
      fact:  FactRef {
        id,
        schema: table.schema.clone(),
      },
      fresh: true,
    });

    self.run()?;
    let changes = self.changes()?;
    let fact = read::fact(self.conn, self.artifact, id)?.ok_or(Error::FactNotFound(id))?;
    Ok(Activation { fact, changes })
  }

  pub fn retract(mut self, id: FactId) -> Result<Retraction> {
    let schema = read::schema_of(self.conn, self.artifact, id)?.ok_or(Error::FactNotFound(id))?;
    let table = read::table(self.artifact, &schema)?;
    if table.derived {
      return Err(Error::DerivedSchema(schema));
    }
    if !self.is_active(table, id)? {
      return Err(Error::AlreadyRetracted(id));
    }

    self.set_active(table, id, false)?;
    tracing::trace!(fact = %id, schema = %schema, "retracted");
    self.queue.push_back(Event::Deactivated(FactRef { id, schema }));

    self.run()?;
    let changes = self.changes()?;
    let fact = read::fact(self.conn, self.artifact, id)?.ok_or(Error::FactNotFound(id))?;
    Ok(Retraction { fact, changes })
  }

  // ─── Fixpoint ──────────────────────────────────────────────────────────────

  fn run(&mut self) -> Result<()> {
    loop {
      self.drain()?;
      if !self.rederive()? {
        break;
      }
    }
    self.settle()
  }

  fn drain(&mut self) -> Result<()> {
    while let Some(event) = self.queue.pop_front() {
      self.steps += 1;
      if self.steps > self.limits.max_cascade_steps {
        return Err(Error::CascadeLimit(self.limits.max_cascade_steps));
      }

      let artifact = self.artifact;
      match event {
        Event::Activated { fact, fresh } => {
          tracing::trace!(fact = %fact.id, schema = %fact.schema, fresh, "activation");
          for procedure in artifact.procedures_for(&fact.schema, Trigger::Activate) {
            match procedure.effect {
              Effect::Derive => self.join(procedure, &fact, fresh)?,
              Effect::Block => self.withdraw(procedure, &fact)?,
              Effect::Invalidate | Effect::Unblock => {}
            }
          }
        }
        Event::Deactivated(fact) => {
          tracing::trace!(fact = %fact.id, schema = %fact.schema, "deactivation");
          for procedure in artifact.procedures_for(&fact.schema, Trigger::Deactivate) {
            match procedure.effect {
              Effect::Invalidate => self.withdraw(procedure, &fact)?,
              Effect::Unblock => self.join(procedure, &fact, false)?,
              Effect::Derive | Effect::Block => {}
            }
          }
        }
      }
    }
    Ok(())
  }

  /// Revive pending facts that still have well-founded support. Returns
  /// whether anything was revived.
  fn rederive(&mut self) -> Result<bool> {
    let mut revived = false;
    let candidates: Vec<FactId> = self.pending.iter().copied().collect();

    for id in candidates {
      if !self.pending.contains(&id) {
        continue;
      }
      for justification in read::justifications(self.conn, self.artifact, id)? {
        let rule = self.rule(&justification.rule)?;
        if self.revalidate(rule, justification.id)? {
          self.restore(rule, justification.id, id)?;
          revived = true;
          break;
        }
      }
    }
    Ok(revived)
  }

  /// Recompute `valid` for every justification this write touched.
  fn settle(&mut self) -> Result<()> {
    for id in std::mem::take(&mut self.touched) {
      let rule: String = self
        .conn
        .prepare_cached(&self.artifact.catalog.rule_of)?
        .query_row([id], |r| r.get(0))?;
      let valid = self.revalidate(self.rule(&rule)?, id)?;
      self.set_valid(id, valid)?;
    }
    for id in &self.pending {
      tracing::trace!(fact = %id, "left without support");
    }
    Ok(())
  }

  fn changes(&self) -> Result<Changes> {
    let mut changes = Changes::default();
    for (id, (schema, was)) in &self.before {
      let now = self.is_active(read::table(self.artifact, schema)?, *id)?;
      match (was, now) {
        (false, true) => changes.activated.push(*id),
        (true, false) => changes.deactivated.push(*id),
        _ => {}
      }
    }
    Ok(changes)
  }

  // ─── Effects ───────────────────────────────────────────────────────────────

  /// Run a `Derive` or `Unblock` join and derive every row.
  fn join(&mut self, procedure: &Procedure, pivot: &FactRef, fresh: bool) -> Result<()> {
    let rule = self.rule(&procedure.rule)?;
    let sql = match (&procedure.reactivation_sql, fresh) {
      (Some(again), false) => again,
      _ => &procedure.sql,
    };

    let rows = {
      let mut stmt = self.conn.prepare_cached(sql)?;
      let mut rows = stmt.query(named_params! { ":pivot": pivot.id.0 })?;
      let mut out = Vec::new();
      while let Some(row) = rows.next()? {
        let sources = (0..rule.sources)
          .map(|i| row.get(i).map(FactId))
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let values = (0..rule.fields.len())
          .map(|i| row.get::<_, SqlValue>(rule.sources + i))
          .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push((sources, values));
      }
      out
    };

    if !rows.is_empty() {
      tracing::trace!(procedure = %procedure.name, pivot = %pivot.id, rows = rows.len(), "join");
    }
    for (sources, values) in rows {
      self.derive(rule, &sources, &values)?;
    }
    Ok(())
  }

  /// Record one match of `rule`.
  fn derive(&mut self, rule: &RuleInfo, sources: &[FactId], values: &[SqlValue]) -> Result<()> {
    let key = encode::source_key(sources);

    let existing: Option<(i64, FactId, bool)> = self
      .conn
      .prepare_cached(&self.artifact.catalog.find_justification)?
      .query_row(rusqlite::params![rule.name, key], |r| {
        Ok((r.get(0)?, FactId(r.get(1)?), r.get(2)?))
      })
      .optional()?;

    match existing {
      // The same sources already justify it.
      Some((_, _, true)) => return Ok(()),
      Some((id, derived, false)) => return self.restore(rule, id, derived),
      None => {}
    }

    let table = read::table(self.artifact, &rule.target)?;
    let merged = match rule.mode {
      DedupMode::Distinct => self.find_active(table, values)?,
      DedupMode::Always => None,
    };
    let derived = match merged {
      Some(id) => id,
      None => {
        let id = self.insert(table, values)?;
        self.queue.push_back(Event::Activated {
          fact:  FactRef {
            id,
            schema: table.schema.clone(),
          },
          fresh: true,
        });
        id
      }
    };

    self
      .conn
      .prepare_cached(&self.artifact.catalog.insert_justification)?
      .execute(rusqlite::params![derived.0, rule.name, key])?;
    let justification = self.conn.last_insert_rowid();
    let mut insert_source = self.conn.prepare_cached(&self.artifact.catalog.insert_source)?;
    for (position, source) in sources.iter().enumerate() {
      insert_source.execute(rusqlite::params![justification, position as i64, source.0])?;
    }

    tracing::trace!(
      rule = %rule.name,
      fact = %derived,
      justification,
      merged = merged.is_some(),
      "derived"
    );
    Ok(())
  }

  /// Make justification `id` valid again and bring `derived` back with it.
  /// A distinct fact whose values an active fact already holds is merged
  /// into that fact instead.
  fn restore(&mut self, rule: &RuleInfo, id: i64, derived: FactId) -> Result<()> {
    self.set_valid(id, true)?;
    self.touched.insert(id);

    let table = read::table(self.artifact, &rule.target)?;
    if self.is_active(table, derived)? {
      return Ok(());
    }

    if rule.mode == DedupMode::Distinct {
      let values = self.values_of(table, derived)?;
      if let Some(other) = self.find_active(table, &values)? {
        for justification in read::justifications(self.conn, self.artifact, derived)? {
          self.touched.insert(justification.id);
        }
        self
          .conn
          .prepare_cached(&self.artifact.catalog.retarget)?
          .execute([derived.0, other.0])?;
        self.pending.remove(&derived);
        tracing::trace!(fact = %derived, into = %other, "merged on restore");
        return Ok(());
      }
    }

    self.set_active(table, derived, true)?;
    self.pending.remove(&derived);
    self.queue.push_back(Event::Activated {
      fact:  FactRef {
        id:     derived,
        schema: table.schema.clone(),
      },
      fresh: false,
    });
    Ok(())
  }

  /// Invalidate the justifications an `Invalidate` or `Block` procedure
  /// returns and over-delete what they derived.
  fn withdraw(&mut self, procedure: &Procedure, pivot: &FactRef) -> Result<()> {
    let rows: Vec<(i64, FactId)> = self
      .conn
      .prepare_cached(&procedure.sql)?
      .query_map(named_params! { ":pivot": pivot.id.0 }, |r| {
        Ok((r.get(0)?, FactId(r.get(1)?)))
      })?
      .collect::<rusqlite::Result<_>>()?;

    let rule = self.rule(&procedure.rule)?;
    let table = read::table(self.artifact, &rule.target)?;
    for (justification, derived) in rows {
      self.set_valid(justification, false)?;
      self.touched.insert(justification);

      if self.is_active(table, derived)? {
        self.set_active(table, derived, false)?;
        self.pending.insert(derived);
        self.queue.push_back(Event::Deactivated(FactRef {
          id:     derived,
          schema: table.schema.clone(),
        }));
      }
    }
    Ok(())
  }

  // ─── Statements ────────────────────────────────────────────────────────────

  fn rule(&self, name: &str) -> Result<&'a RuleInfo> {
    self
      .artifact
      .rules
      .get(name)
      .ok_or_else(|| Error::Corrupt(format!("justification names unknown rule {name:?}")))
  }

  fn revalidate(&self, rule: &RuleInfo, justification: i64) -> Result<bool> {
    Ok(
      self
        .conn
        .prepare_cached(&rule.revalidate)?
        .query_row(named_params! { ":justification": justification }, |r| r.get(0))?,
    )
  }

  fn insert(&mut self, table: &FactTable, values: &[SqlValue]) -> Result<FactId> {
    self
      .conn
      .prepare_cached(&self.artifact.catalog.register)?
      .execute([&table.schema])?;
    let id = self.conn.last_insert_rowid();

    let params = std::iter::once(SqlValue::Integer(id)).chain(values.iter().cloned());
    self
      .conn
      .prepare_cached(&table.insert)?
      .execute(params_from_iter(params))?;

    self
      .before
      .entry(FactId(id))
      .or_insert_with(|| (table.schema.clone(), false));
    Ok(FactId(id))
  }

  fn find_active(&self, table: &FactTable, values: &[SqlValue]) -> Result<Option<FactId>> {
    Ok(
      self
        .conn
        .prepare_cached(&table.find_active)?
        .query_row(params_from_iter(values.iter()), |r| r.get(0).map(FactId))
        .optional()?,
    )
  }

  fn values_of(&self, table: &FactTable, id: FactId) -> Result<Vec<SqlValue>> {
    let raw = self
      .conn
      .prepare_cached(&table.select_one)?
      .query_row([id.0], |r| encode::RawFact::from_row(r, table.fields.len()))
      .optional()?
      .ok_or(Error::FactNotFound(id))?;
    Ok(raw.fields)
  }

  fn is_active(&self, table: &FactTable, id: FactId) -> Result<bool> {
    let active = self
      .conn
      .prepare_cached(&table.select_one)?
      .query_row([id.0], |r| r.get::<_, bool>(2))
      .optional()?;
    active.ok_or(Error::FactNotFound(id))
  }

  fn set_active(&mut self, table: &FactTable, id: FactId, active: bool) -> Result<()> {
    self
      .before
      .entry(id)
      .or_insert_with(|| (table.schema.clone(), !active));
    self
      .conn
      .prepare_cached(&table.set_active)?
      .execute(rusqlite::params![id.0, active])?;
    Ok(())
  }

  fn set_valid(&self, justification: i64, valid: bool) -> Result<()> {
    self
      .conn
      .prepare_cached(&self.artifact.catalog.set_valid)?
      .execute(rusqlite::params![justification, valid])?;
    Ok(())
  }
}
