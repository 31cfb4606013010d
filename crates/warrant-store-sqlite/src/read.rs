//! Read paths shared by the cascade and the store's query methods.

use indexmap::IndexMap;
use rusqlite::{Connection, OptionalExtension as _};
use warrant_core::fact::{Explanation, FactId, FactInstance, Justification, Support};
use warrant_sql::{Artifact, FactTable};

use crate::{Error, Result, encode::RawFact};

pub fn table<'a>(artifact: &'a Artifact, schema: &str) -> Result<&'a FactTable> {
  artifact
    .table(schema)
    .ok_or_else(|| Error::UnknownSchema(schema.to_string()))
}

pub fn schema_of(conn: &Connection, artifact: &Artifact, id: FactId) -> Result<Option<String>> {
  Ok(
    conn
      .prepare_cached(&artifact.catalog.schema_of)?
      .query_row([id.0], |r| r.get(0))
      .optional()?,
  )
}

pub fn fact(conn: &Connection, artifact: &Artifact, id: FactId) -> Result<Option<FactInstance>> {
  let Some(schema) = schema_of(conn, artifact, id)? else {
    return Ok(None);
  };
  let table = table(artifact, &schema)?;
  let raw = conn
    .prepare_cached(&table.select_one)?
    .query_row([id.0], |r| RawFact::from_row(r, table.fields.len()))
    .optional()?;
  raw.map(|raw| raw.decode(table)).transpose()
}

pub fn facts(
  conn: &Connection,
  artifact: &Artifact,
  schema: &str,
  include_inactive: bool,
) -> Result<Vec<FactInstance>> {
  let table = table(artifact, schema)?;
  let floor = if include_inactive { 0 } else { 1 };
  let mut stmt = conn.prepare_cached(&table.select_all)?;
  let raws = stmt
    .query_map([floor], |r| RawFact::from_row(r, table.fields.len()))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(|raw| raw.decode(table)).collect()
}

pub fn sources_of(conn: &Connection, artifact: &Artifact, justification: i64) -> Result<Vec<FactId>> {
  let mut stmt = conn.prepare_cached(&artifact.catalog.sources_of)?;
  let ids = stmt
    .query_map([justification], |r| r.get(0).map(FactId))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(ids)
}

pub fn justifications(
  conn: &Connection,
  artifact: &Artifact,
  derived: FactId,
) -> Result<Vec<Justification>> {
  let rows: Vec<(i64, String, bool)> = conn
    .prepare_cached(&artifact.catalog.justifications_of)?
    .query_map([derived.0], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
    .collect::<rusqlite::Result<_>>()?;

  rows
    .into_iter()
    .map(|(id, rule, valid)| {
      Ok(Justification {
        id,
        derived,
        rule,
        sources: sources_of(conn, artifact, id)?,
        valid,
      })
    })
    .collect()
}

/// Resolve `id` through its valid justifications. A fact already on the
/// current path is returned unexpanded with `elided` set.
pub fn explain(conn: &Connection, artifact: &Artifact, id: FactId) -> Result<Option<Explanation>> {
  let mut explainer = Explainer::new(conn, artifact);
  let explanation = explainer.explain(id)?;
  tracing::trace!(fact = %id, loads = explainer.loads, "fact explained");
  Ok(explanation)
}

/// One `explain` call. Each fact is read once; an expansion that elided
/// nothing is the same on every path and is reused as is.
pub(crate) struct Explainer<'a> {
  conn:     &'a Connection,
  artifact: &'a Artifact,
  loaded:   IndexMap<FactId, Option<(FactInstance, Vec<Justification>)>>,
  expanded: IndexMap<FactId, Explanation>,
  path:     Vec<FactId>,
  /// Facts read from the database so far.
  loads:    usize,
}

impl<'a> Explainer<'a> {
  pub(crate) fn new(conn: &'a Connection, artifact: &'a Artifact) -> Self {
    Self {
      conn,
      artifact,
      loaded: IndexMap::new(),
      expanded: IndexMap::new(),
      path: Vec::new(),
      loads: 0,
    }
  }

  pub(crate) fn explain(&mut self, id: FactId) -> Result<Option<Explanation>> {
    Ok(self.walk(id)?.map(|(explanation, _)| explanation))
  }

  #[cfg(test)]
  pub(crate) fn loads(&self) -> usize { self.loads }

  /// The fact and its valid justifications.
  fn load(&mut self, id: FactId) -> Result<Option<(FactInstance, Vec<Justification>)>> {
    if let Some(entry) = self.loaded.get(&id) {
      return Ok(entry.clone());
    }
    self.loads += 1;
    let entry = match fact(self.conn, self.artifact, id)? {
      Some(fact) => {
        let mut valid = justifications(self.conn, self.artifact, id)?;
        valid.retain(|j| j.valid);
        Some((fact, valid))
      }
      None => None,
    };
    self.loaded.insert(id, entry.clone());
    Ok(entry)
  }

  /// The explanation of `id`, and whether anything below it was elided.
  fn walk(&mut self, id: FactId) -> Result<Option<(Explanation, bool)>> {
    if let Some(done) = self.expanded.get(&id) {
      return Ok(Some((done.clone(), false)));
    }
    let Some((fact, valid)) = self.load(id)? else {
      return Ok(None);
    };
    if self.path.contains(&id) {
      let explanation = Explanation {
        fact,
        supports: Vec::new(),
        elided: true,
      };
      return Ok(Some((explanation, true)));
    }

    self.path.push(id);
    let mut supports = Vec::with_capacity(valid.len());
    let mut elided = false;
    for justification in valid {
      let mut sources = Vec::with_capacity(justification.sources.len());
      for source in justification.sources {
        let (explained, below) = self
          .walk(source)?
          .ok_or_else(|| Error::Corrupt(format!("justification names missing fact {source}")))?;
        elided |= below;
        sources.push(explained);
      }
      supports.push(Support {
        rule: justification.rule,
        sources,
      });
    }
    self.path.pop();

    let explanation = Explanation {
      fact,
      supports,
      elided: false,
    };
    if !elided {
      self.expanded.insert(id, explanation.clone());
    }
    Ok(Some((explanation, elided)))
  }
}
