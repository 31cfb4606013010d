//! Table definitions and the per-table statements.

use indexmap::{IndexMap, IndexSet};
use warrant_core::{
  Specification,
  model::FactSchema,
  plan::RulePlans,
  value::FieldType,
};

use crate::{
  artifact::{Catalog, FactTable, Statement},
  naming::{Names, ident},
};

pub fn column_type(ty: FieldType) -> &'static str {
  match ty {
    FieldType::Boolean | FieldType::Integer => "INTEGER",
    FieldType::Real => "REAL",
    FieldType::String => "TEXT",
  }
}

/// DDL for the registry, every fact table, and the justification tables, in
/// that order, followed by lookup indexes the plans ask for.
pub fn statements(
  names: &Names,
  spec: &Specification,
  plans: &IndexMap<String, RulePlans>,
) -> Vec<Statement> {
  let registry = names.registry();
  let mut out = vec![Statement::new(
    registry.clone(),
    format!(
      "CREATE TABLE IF NOT EXISTS {} (\n  \"id\"     INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
       \"schema\" TEXT NOT NULL\n)",
      ident(&registry)
    ),
  )];

  for schema in spec.facts.values() {
    let table = names.fact_table(&schema.name);
    let mut columns = vec![
      format!("\"id\" INTEGER PRIMARY KEY REFERENCES {}(\"id\")", ident(&registry)),
      "\"seq\" INTEGER NOT NULL UNIQUE".to_string(),
      "\"active\" INTEGER NOT NULL DEFAULT 1 CHECK (\"active\" IN (0, 1))".to_string(),
    ];
    for (field, ty) in &schema.fields {
      let check = match ty {
        FieldType::Boolean => format!(" CHECK ({} IN (0, 1))", ident(field)),
        _ => String::new(),
      };
      columns.push(format!("{} {} NOT NULL{check}", ident(field), column_type(*ty)));
    }
    out.push(Statement::new(
      table.clone(),
      format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        ident(&table),
        columns.join(",\n  ")
      ),
    ));
    out.push(index(names, &table, &["active", "seq"]));
  }

  let justifications = names.justifications();
  out.push(Statement::new(
    justifications.clone(),
    format!(
      "CREATE TABLE IF NOT EXISTS {} (\n  \
       \"id\"         INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
       \"derived_id\" INTEGER NOT NULL REFERENCES {}(\"id\"),\n  \
       \"rule\"       TEXT NOT NULL,\n  \
       \"source_key\" TEXT NOT NULL,\n  \
       \"valid\"      INTEGER NOT NULL DEFAULT 1 CHECK (\"valid\" IN (0, 1)),\n  \
       UNIQUE (\"rule\", \"source_key\")\n)",
      ident(&justifications),
      ident(&registry)
    ),
  ));
  out.push(index(names, &justifications, &["derived_id"]));

  let sources = names.justification_sources();
  out.push(Statement::new(
    sources.clone(),
    format!(
      "CREATE TABLE IF NOT EXISTS {} (\n  \
       \"justification_id\" INTEGER NOT NULL REFERENCES {}(\"id\"),\n  \
       \"position\"         INTEGER NOT NULL,\n  \
       \"source_id\"        INTEGER NOT NULL REFERENCES {}(\"id\"),\n  \
       PRIMARY KEY (\"justification_id\", \"position\")\n)",
      ident(&sources),
      ident(&justifications),
      ident(&registry)
    ),
  ));
  out.push(index(names, &sources, &["source_id", "position"]));

  // One index per distinct set of equality-joined fields.
  let mut lookups: IndexSet<(String, Vec<String>)> = IndexSet::new();
  for plan in plans.values().flat_map(|r| &r.plans) {
    for step in &plan.steps {
      if !step.keys.is_empty() {
        lookups.insert((step.fact.clone(), step.keys.clone()));
      }
    }
  }
  for (fact, keys) in &lookups {
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    out.push(index(names, &names.fact_table(fact), &keys));
  }

  out
}

fn index(names: &Names, table: &str, columns: &[&str]) -> Statement {
  let name = names.index(table, columns);
  let list: Vec<String> = columns.iter().map(|c| ident(c)).collect();
  Statement::new(
    name.clone(),
    format!(
      "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
      ident(&name),
      ident(table),
      list.join(", ")
    ),
  )
}

pub fn fact_table(names: &Names, schema: &FactSchema, derived: bool) -> FactTable {
  let table = names.fact_table(&schema.name);
  let quoted = ident(&table);
  let fields: Vec<String> = schema.fields.keys().map(|f| ident(f)).collect();

  let mut insert_columns = vec!["\"id\"".to_string(), "\"seq\"".into(), "\"active\"".into()];
  insert_columns.extend(fields.iter().cloned());
  let mut insert_values = vec!["?1".to_string(), "?1".into(), "1".into()];
  insert_values.extend((0..fields.len()).map(|i| format!("?{}", i + 2)));

  let mut find = vec!["\"active\" = 1".to_string()];
  find.extend(fields.iter().enumerate().map(|(i, f)| format!("{f} = ?{}", i + 1)));

  let mut select = vec!["\"id\"".to_string(), "\"seq\"".into(), "\"active\"".into()];
  select.extend(fields.iter().cloned());
  let select = select.join(", ");

  let insert = format!(
    "INSERT INTO {quoted} ({}) VALUES ({})",
    insert_columns.join(", "),
    insert_values.join(", ")
  );
  let set_active = format!("UPDATE {quoted} SET \"active\" = ?2 WHERE \"id\" = ?1");
  let entry_points = if derived {
    Vec::new()
  } else {
    vec![
      Statement::new(names.entry_point(&schema.name, "insert"), insert.clone()),
      Statement::new(names.entry_point(&schema.name, "set_active"), set_active.clone()),
    ]
  };

  FactTable {
    schema: schema.name.clone(),
    table: table.clone(),
    fields: schema.fields.clone(),
    derived,
    insert,
    find_active: format!(
      "SELECT \"id\" FROM {quoted} WHERE {} ORDER BY \"seq\" LIMIT 1",
      find.join(" AND ")
    ),
    set_active,
    select_one: format!("SELECT {select} FROM {quoted} WHERE \"id\" = ?1"),
    select_all: format!(
      "SELECT {select} FROM {quoted} WHERE \"active\" >= ?1 ORDER BY \"seq\""
    ),
    entry_points,
  }
}

pub fn catalog(names: &Names) -> Catalog {
  let registry = ident(&names.registry());
  let justifications = ident(&names.justifications());
  let sources = ident(&names.justification_sources());

  Catalog {
    register:             format!("INSERT INTO {registry} (\"schema\") VALUES (?1)"),
    schema_of:            format!("SELECT \"schema\" FROM {registry} WHERE \"id\" = ?1"),
    find_justification:   format!(
      "SELECT \"id\", \"derived_id\", \"valid\" FROM {justifications} \
       WHERE \"rule\" = ?1 AND \"source_key\" = ?2"
    ),
    insert_justification: format!(
      "INSERT INTO {justifications} (\"derived_id\", \"rule\", \"source_key\", \"valid\") \
       VALUES (?1, ?2, ?3, 1)"
    ),
    insert_source:        format!(
      "INSERT INTO {sources} (\"justification_id\", \"position\", \"source_id\") \
       VALUES (?1, ?2, ?3)"
    ),
    set_valid:            format!("UPDATE {justifications} SET \"valid\" = ?2 WHERE \"id\" = ?1"),
    rule_of:              format!("SELECT \"rule\" FROM {justifications} WHERE \"id\" = ?1"),
    justifications_of:    format!(
      "SELECT \"id\", \"rule\", \"valid\" FROM {justifications} \
       WHERE \"derived_id\" = ?1 ORDER BY \"id\""
    ),
    sources_of:           format!(
      "SELECT \"source_id\" FROM {sources} \
       WHERE \"justification_id\" = ?1 ORDER BY \"position\""
    ),
    retarget:             format!(
      "UPDATE {justifications} SET \"derived_id\" = ?2 WHERE \"derived_id\" = ?1"
    ),
  }
}
