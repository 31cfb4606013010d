//! Base facts for `warrant run`, read from a YAML list:
//!
//! ```yaml
//! - PersonExists: { Name: Rob }
//! - Inhabits: { Thing: Rob, Place: Chez Rob }
//! ```

use std::path::Path;

use anyhow::{Context as _, bail};
use indexmap::IndexMap;
use warrant_core::{Value, fact::NewFact};

type Entry = IndexMap<String, IndexMap<String, Value>>;

pub fn parse(text: &str) -> anyhow::Result<Vec<NewFact>> {
  let entries: Vec<Entry> = serde_yaml_ng::from_str(text).context("facts must be a YAML list")?;
  entries
    .into_iter()
    .enumerate()
    .map(|(index, entry)| {
      let mut fields = entry.into_iter();
      let (Some((schema, values)), None) = (fields.next(), fields.next()) else {
        bail!("fact #{index} must map exactly one schema name to its fields");
      };
      Ok(NewFact { schema, values })
    })
    .collect()
}

pub fn load(path: &Path) -> anyhow::Result<Vec<NewFact>> {
  let text = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read facts from {}", path.display()))?;
  parse(&text).with_context(|| format!("in {}", path.display()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_facts_in_order() {
    let facts = parse(
      "- PersonExists: { Name: Rob }\n- Inhabits: { Thing: Rob, Place: Chez Rob }\n- Reading: { Level: 2, Ok: true }\n",
    )
    .unwrap();
    assert_eq!(facts.len(), 3);
    assert_eq!(facts[0], NewFact::new("PersonExists").with("Name", "Rob"));
    assert_eq!(facts[1].values["Place"], Value::from("Chez Rob"));
    assert_eq!(facts[2].values["Level"], Value::Integer(2));
    assert_eq!(facts[2].values["Ok"], Value::Boolean(true));
  }

  #[test]
  fn rejects_entries_naming_two_schemas() {
    assert!(parse("- A: { X: 1 }\n  B: { Y: 2 }\n").is_err());
    assert!(parse("- {}\n").is_err());
  }
}
