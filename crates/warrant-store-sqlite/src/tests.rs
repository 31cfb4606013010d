//! Integration tests for `SqliteEngine` against an in-memory database.

use proptest::prelude::*;
use warrant_core::{
  CompileOptions, Specification, Value,
  fact::{Explanation, FactId, FactInstance, NewFact},
  store::InferenceStore,
};
use warrant_sql::GenerateOptions;

use crate::{
  Error, Limits, SqliteEngine,
  cascade::Cascade,
  read::{self, Explainer},
};

const PETS: &str = r#"
Facts:
  PersonExists: { Name: STRING }
  AnimalExists: { Name: STRING }
  Inhabits: { Thing: STRING, Place: STRING }
  IsAPet: { Person: STRING, Pet: STRING }
Rules:
  PetsLiveWithPeople:
    MatchAll:
      - Fact: PersonExists
        Assign: { Person: !expr This.Name }
      - Fact: Inhabits
        When: !expr This.Thing == Locals.Person
        Assign: { Home: !expr This.Place }
      - Fact: AnimalExists
        Assign: { Pet: !expr This.Name }
      - Fact: Inhabits
        When: !expr This.Thing == Locals.Pet && This.Place == Locals.Home
    Assert: !distinct
      IsAPet: { Person: !expr Locals.Person, Pet: !expr Locals.Pet }
"#;

const NETWORK: &str = r#"
Description: Flag data flowing from high-security networks to lower ones
Facts:
  Network: { Name: STRING, Level: INTEGER }
  Link: { From: STRING, To: STRING }
  AllowException: { From: STRING, To: STRING }
  Reachable: { From: STRING, To: STRING }
  Alert: { Kind: STRING, Network: STRING, Detail: STRING }
Rules:
  DirectLink:
    MatchAll:
      - Fact: Link
        Assign: { From: !expr This.From, To: !expr This.To }
    Assert: !distinct
      Reachable: { From: !expr Locals.From, To: !expr Locals.To }
  TransitiveLink:
    MatchAll:
      - Fact: Reachable
        Assign: { From: !expr This.From, Via: !expr This.To }
      - Fact: Link
        When: !expr This.From == Locals.Via && This.To != Locals.From
        Assign: { To: !expr This.To }
    Assert: !distinct
      Reachable: { From: !expr Locals.From, To: !expr Locals.To }
  DownwardFlow:
    MatchAll:
      - Fact: Reachable
        Assign: { From: !expr This.From, To: !expr This.To }
      - Fact: Network
        When: !expr This.Name == Locals.From
        Assign: { High: !expr This.Level }
      - Fact: Network
        When: !expr This.Name == Locals.To && This.Level < Locals.High
    MatchNone:
      - Fact: AllowException
        When: !expr This.From == Locals.From && This.To == Locals.To
    Assert: !distinct
      Alert:
        Kind: downward
        Network: !expr Locals.From
        Detail: !expr "Locals.From . ' -> ' . Locals.To"
  OrphanNetwork:
    MatchAll:
      - Fact: Network
        Assign: { Name: !expr This.Name }
    MatchNone:
      - Fact: Link
        When: !expr This.From == Locals.Name || This.To == Locals.Name
    Assert: !distinct
      Alert: { Kind: orphan, Network: !expr Locals.Name, Detail: none }
"#;

const OWNERSHIP: &str = r#"
Facts:
  Owns: { Person: STRING, Thing: STRING }
  Cares: { Person: STRING }
Rules:
  CaresIfOwns:
    MatchAll:
      - Fact: Owns
        Assign: { Who: !expr This.Person }
    Assert: !distinct { Cares: { Person: !expr Locals.Who } }
"#;

const CHAIN: &str = r#"
Facts:
  Base: { N: INTEGER }
  Step1: { N: INTEGER }
  Step2: { N: INTEGER }
  Step3: { N: INTEGER }
Rules:
  One:
    MatchAll:
      - Fact: Base
        Assign: { N: !expr This.N }
    Assert: { Step1: { N: !expr Locals.N + 1 } }
  Two:
    MatchAll:
      - Fact: Step1
        Assign: { N: !expr This.N }
    Assert: { Step2: { N: !expr Locals.N + 1 } }
  Three:
    MatchAll:
      - Fact: Step2
        Assign: { N: !expr This.N }
    Assert: { Step3: { N: !expr Locals.N + 1 } }
"#;

const COUNTER: &str = r#"
Facts:
  Seed: { N: INTEGER }
  Count: { N: INTEGER }
Rules:
  Start:
    MatchAll:
      - Fact: Seed
        Assign: { N: !expr This.N }
    Assert: !distinct { Count: { N: !expr Locals.N } }
  Next:
    MatchAll:
      - Fact: Count
        Assign: { N: !expr This.N }
    Assert: !distinct { Count: { N: !expr Locals.N + 1 } }
"#;

/// Two derived nodes per layer, each derived from both nodes of the layer
/// below: every layer doubles the number of paths down to the root.
const DIAMOND: &str = r#"
Constants:
  Depth: 12
Facts:
  Root: { Layer: INTEGER }
  Node: { Layer: INTEGER, Side: STRING }
Rules:
  StartLeft:
    MatchAll: [{ Fact: Root, Assign: { L: !expr This.Layer } }]
    Assert: !distinct { Node: { Layer: !expr Locals.L, Side: left } }
  StartRight:
    MatchAll: [{ Fact: Root, Assign: { L: !expr This.Layer } }]
    Assert: !distinct { Node: { Layer: !expr Locals.L, Side: right } }
  Left:
    MatchAll:
      - Fact: Node
        When: !expr This.Layer < Constants.Depth
        Assign: { L: !expr This.Layer + 1 }
    Assert: !distinct { Node: { Layer: !expr Locals.L, Side: left } }
  Right:
    MatchAll:
      - Fact: Node
        When: !expr This.Layer < Constants.Depth
        Assign: { L: !expr This.Layer + 1 }
    Assert: !distinct { Node: { Layer: !expr Locals.L, Side: right } }
"#;

/// Hosts whose names start with a database prefix are internal.
const HOSTS: &str = r#"
Facts:
  Host: { Name: STRING }
  Internal: { Name: STRING }
  Public: { Name: STRING }
Rules:
  Databases:
    MatchAll:
      - Fact: Host
        When: !expr This.Name ~ 'db[0-9]+'
        Assign: { N: !expr This.Name }
    Assert: !distinct { Internal: { Name: !expr Locals.N } }
  Others:
    MatchAll:
      - Fact: Host
        When: !expr This.Name !~ 'db[0-9]+'
        Assign: { N: !expr This.Name }
    Assert: !distinct { Public: { Name: !expr Locals.N } }
"#;

const LABELS: &str = r#"
Functions:
  Shout: { External: upper, Parameters: [STRING], Returns: STRING }
  Mirror: { External: test_mirror, Parameters: [STRING], Returns: STRING }
Facts:
  Name: { Text: STRING }
  Label: { Loud: STRING, Mirrored: STRING }
Rules:
  Decorate:
    MatchAll: [{ Fact: Name, Assign: { T: !expr This.Text } }]
    Assert: { Label: { Loud: !expr Shout(Locals.T), Mirrored: !expr mirror(Locals.T) } }
"#;

/// Like `COUNTER`, but every rule keeps its derivations apart and the
/// recursion stops at five.
const BOUNDED_COUNTER: &str = r#"
Facts:
  Seed: { N: INTEGER }
  Count: { N: INTEGER }
Rules:
  Start:
    MatchAll: [{ Fact: Seed, Assign: { N: !expr This.N } }]
    Assert: { Count: { N: !expr Locals.N } }
  Next:
    MatchAll:
      - Fact: Count
        When: !expr This.N < 5
        Assign: { N: !expr This.N }
    Assert: { Count: { N: !expr Locals.N + 1 } }
"#;

fn options(allow_cycles: bool) -> CompileOptions {
  CompileOptions {
    allow_cycles,
    ..CompileOptions::default()
  }
}

async fn engine(text: &str, allow_cycles: bool) -> SqliteEngine {
  engine_with(text, &options(allow_cycles)).await
}

async fn engine_with(text: &str, options: &CompileOptions) -> SqliteEngine {
  let spec = Specification::from_yaml(text, options).expect("valid specification");
  let artifact =
    warrant_sql::compile(&spec, &GenerateOptions::default()).expect("artifact");
  SqliteEngine::open_in_memory(artifact)
    .await
    .expect("in-memory engine")
}

/// Values of the active facts of `schema`, sorted.
async fn active(engine: &SqliteEngine, schema: &str) -> Vec<Vec<Value>> {
  let mut rows: Vec<Vec<Value>> = engine
    .facts(schema, false)
    .await
    .unwrap()
    .into_iter()
    .map(|fact| fact.values.into_values().collect())
    .collect();
  rows.sort_by_key(|row| format!("{row:?}"));
  rows
}

fn text(values: &[&str]) -> Vec<Value> {
  values.iter().map(|v| Value::from(*v)).collect()
}

fn network() -> Vec<NewFact> {
  vec![
    NewFact::new("Network").with("Name", "Public").with("Level", 1_i64),
    NewFact::new("Network").with("Name", "Office").with("Level", 2_i64),
    NewFact::new("Network").with("Name", "Secure").with("Level", 3_i64),
    NewFact::new("Network").with("Name", "Lab").with("Level", 2_i64),
    NewFact::new("Link").with("From", "Public").with("To", "Office"),
    NewFact::new("Link").with("From", "Office").with("To", "Secure"),
    NewFact::new("Link").with("From", "Secure").with("To", "Office"),
  ]
}

fn exception() -> NewFact {
  NewFact::new("AllowException")
    .with("From", "Secure")
    .with("To", "Office")
}

async fn alerts(engine: &SqliteEngine, kind: &str) -> Vec<Vec<Value>> {
  active(engine, "Alert")
    .await
    .into_iter()
    .filter(|row| row[0] == Value::from(kind))
    .collect()
}

// ─── Derivation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn pets_live_with_their_people() {
  let e = engine(PETS, false).await;

  let rob = e
    .assert_fact(NewFact::new("PersonExists").with("Name", "Rob"))
    .await
    .unwrap();
  let caboose = e
    .assert_fact(NewFact::new("AnimalExists").with("Name", "Caboose"))
    .await
    .unwrap();
  let home = e
    .assert_fact(
      NewFact::new("Inhabits")
        .with("Thing", "Rob")
        .with("Place", "Chez Rob"),
    )
    .await
    .unwrap();
  assert!(active(&e, "IsAPet").await.is_empty());

  let lives = e
    .assert_fact(
      NewFact::new("Inhabits")
        .with("Thing", "Caboose")
        .with("Place", "Chez Rob"),
    )
    .await
    .unwrap();
  assert_eq!(lives.changes.activated.len(), 2);
  assert_eq!(lives.changes.activated[0], lives.fact.id);

  assert_eq!(active(&e, "IsAPet").await, vec![text(&["Rob", "Caboose"])]);

  let pet = e.facts("IsAPet", false).await.unwrap().remove(0);
  let justifications = e.justifications(pet.id).await.unwrap();
  assert_eq!(justifications.len(), 1);
  assert_eq!(justifications[0].rule, "PetsLiveWithPeople");
  assert!(justifications[0].valid);
  assert_eq!(justifications[0].sources, vec![
    rob.fact.id,
    home.fact.id,
    caboose.fact.id,
    lives.fact.id
  ]);
}

#[tokio::test]
async fn retracting_a_source_withdraws_the_derivation() {
  let e = engine(PETS, false).await;
  e.assert_fact(NewFact::new("PersonExists").with("Name", "Rob"))
    .await
    .unwrap();
  e.assert_fact(NewFact::new("AnimalExists").with("Name", "Caboose"))
    .await
    .unwrap();
  e.assert_fact(
    NewFact::new("Inhabits")
      .with("Thing", "Rob")
      .with("Place", "Chez Rob"),
  )
  .await
  .unwrap();
  let lives = e
    .assert_fact(
      NewFact::new("Inhabits")
        .with("Thing", "Caboose")
        .with("Place", "Chez Rob"),
    )
    .await
    .unwrap();
  let pet = e.facts("IsAPet", false).await.unwrap().remove(0);

  let retraction = e.retract_fact(lives.fact.id).await.unwrap();
  assert!(!retraction.fact.active);
  assert_eq!(retraction.changes.deactivated, vec![lives.fact.id, pet.id]);
  assert!(retraction.changes.activated.is_empty());

  assert!(active(&e, "IsAPet").await.is_empty());
  let kept = e.get_fact(pet.id).await.unwrap().unwrap();
  assert!(!kept.active);
  assert!(!e.justifications(pet.id).await.unwrap()[0].valid);
}

#[tokio::test]
async fn late_person_completes_the_match() {
  let e = engine(PETS, false).await;
  // Insert the pet side first; the person arrives last.
  e.assert_fact(NewFact::new("AnimalExists").with("Name", "Caboose"))
    .await
    .unwrap();
  e.assert_fact(
    NewFact::new("Inhabits")
      .with("Thing", "Caboose")
      .with("Place", "Chez Rob"),
  )
  .await
  .unwrap();
  e.assert_fact(
    NewFact::new("Inhabits")
      .with("Thing", "Rob")
      .with("Place", "Chez Rob"),
  )
  .await
  .unwrap();
  e.assert_fact(NewFact::new("PersonExists").with("Name", "Rob"))
    .await
    .unwrap();

  let pets = e.facts("IsAPet", true).await.unwrap();
  assert_eq!(pets.len(), 1);
  assert_eq!(e.justifications(pets[0].id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cascades_through_several_rules() {
  let e = engine(CHAIN, false).await;

  let base = e
    .assert_fact(NewFact::new("Base").with("N", 1_i64))
    .await
    .unwrap();
  assert_eq!(base.changes.activated.len(), 4);
  assert_eq!(active(&e, "Step3").await, vec![vec![Value::Integer(4)]]);

  let retraction = e.retract_fact(base.fact.id).await.unwrap();
  assert_eq!(retraction.changes.deactivated, base.changes.activated);
  for schema in ["Step1", "Step2", "Step3"] {
    assert!(active(&e, schema).await.is_empty(), "{schema} still active");
  }
}

#[tokio::test]
async fn facts_lists_inactive_only_on_request() {
  let e = engine(CHAIN, false).await;
  let base = e
    .assert_fact(NewFact::new("Base").with("N", 1_i64))
    .await
    .unwrap();
  e.retract_fact(base.fact.id).await.unwrap();
  e.assert_fact(NewFact::new("Base").with("N", 5_i64))
    .await
    .unwrap();

  assert_eq!(e.facts("Step1", false).await.unwrap().len(), 1);
  let all = e.facts("Step1", true).await.unwrap();
  assert_eq!(all.len(), 2);
  assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));
}

// ─── Deduplication ───────────────────────────────────────────────────────────

#[tokio::test]
async fn distinct_merges_equal_derivations() {
  let e = engine(OWNERSHIP, false).await;
  let cat = e
    .assert_fact(NewFact::new("Owns").with("Person", "Ann").with("Thing", "Cat"))
    .await
    .unwrap();
  let dog = e
    .assert_fact(NewFact::new("Owns").with("Person", "Ann").with("Thing", "Dog"))
    .await
    .unwrap();
  assert_eq!(dog.changes.activated, vec![dog.fact.id]);

  let cares = e.facts("Cares", true).await.unwrap();
  assert_eq!(cares.len(), 1);
  let justifications = e.justifications(cares[0].id).await.unwrap();
  assert_eq!(justifications.len(), 2);
  assert!(justifications.iter().all(|j| j.valid));

  // One justification remains, so the fact stays.
  let retraction = e.retract_fact(cat.fact.id).await.unwrap();
  assert_eq!(retraction.changes.deactivated, vec![cat.fact.id]);
  assert!(retraction.changes.activated.is_empty());
  assert_eq!(active(&e, "Cares").await, vec![text(&["Ann"])]);
  let justifications = e.justifications(cares[0].id).await.unwrap();
  assert_eq!(
    justifications.iter().filter(|j| j.valid).count(),
    1,
    "{justifications:?}"
  );

  let retraction = e.retract_fact(dog.fact.id).await.unwrap();
  assert_eq!(retraction.changes.deactivated, vec![cares[0].id, dog.fact.id]);
  assert!(active(&e, "Cares").await.is_empty());
}

#[tokio::test]
async fn always_mode_keeps_equal_facts_apart() {
  let e = engine(&OWNERSHIP.replace("!distinct ", ""), false).await;
  e.assert_fact(NewFact::new("Owns").with("Person", "Ann").with("Thing", "Cat"))
    .await
    .unwrap();
  e.assert_fact(NewFact::new("Owns").with("Person", "Ann").with("Thing", "Dog"))
    .await
    .unwrap();

  let cares = e.facts("Cares", false).await.unwrap();
  assert_eq!(cares.len(), 2);
  for fact in cares {
    assert_eq!(e.justifications(fact.id).await.unwrap().len(), 1);
  }
}

#[tokio::test]
async fn reasserting_derives_again() {
  let e = engine(OWNERSHIP, false).await;
  let cat = e
    .assert_fact(NewFact::new("Owns").with("Person", "Ann").with("Thing", "Cat"))
    .await
    .unwrap();
  e.retract_fact(cat.fact.id).await.unwrap();
  assert!(active(&e, "Cares").await.is_empty());

  let again = e
    .assert_fact(NewFact::new("Owns").with("Person", "Ann").with("Thing", "Cat"))
    .await
    .unwrap();
  assert_eq!(again.changes.activated.len(), 2);
  assert_eq!(active(&e, "Cares").await, vec![text(&["Ann"])]);
}

// ─── Exclusions ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn downward_flow_raises_one_alert() {
  let e = engine(NETWORK, true).await;
  for fact in network() {
    e.assert_fact(fact).await.unwrap();
  }

  assert_eq!(
    active(&e, "Reachable").await,
    vec![
      text(&["Office", "Secure"]),
      text(&["Public", "Office"]),
      text(&["Public", "Secure"]),
      text(&["Secure", "Office"]),
    ]
  );
  assert_eq!(alerts(&e, "downward").await, vec![text(&[
    "downward",
    "Secure",
    "Secure -> Office"
  ])]);
  assert_eq!(alerts(&e, "orphan").await, vec![text(&["orphan", "Lab", "none"])]);
}

#[tokio::test]
async fn exception_blocks_only_its_alert() {
  let e = engine(NETWORK, true).await;
  for fact in network() {
    e.assert_fact(fact).await.unwrap();
  }

  let allowed = e.assert_fact(exception()).await.unwrap();
  assert_eq!(allowed.changes.deactivated.len(), 1);
  assert!(alerts(&e, "downward").await.is_empty());
  assert_eq!(alerts(&e, "orphan").await.len(), 1);

  let lifted = e.retract_fact(allowed.fact.id).await.unwrap();
  assert_eq!(lifted.changes.activated, allowed.changes.deactivated);
  assert_eq!(alerts(&e, "downward").await.len(), 1);
}

#[tokio::test]
async fn linking_a_network_clears_its_orphan_alert() {
  let e = engine(NETWORK, true).await;
  for fact in network() {
    e.assert_fact(fact).await.unwrap();
  }
  let link = e
    .assert_fact(NewFact::new("Link").with("From", "Lab").with("To", "Public"))
    .await
    .unwrap();
  assert!(alerts(&e, "orphan").await.is_empty());
  // Lab (2) now reaches Public (1), Office (2) and Secure (3).
  assert_eq!(alerts(&e, "downward").await.len(), 2);

  e.retract_fact(link.fact.id).await.unwrap();
  assert_eq!(alerts(&e, "orphan").await, vec![text(&["orphan", "Lab", "none"])]);
  assert_eq!(alerts(&e, "downward").await.len(), 1);
}

#[tokio::test]
async fn cutting_a_link_keeps_independently_supported_reachability() {
  let e = engine(NETWORK, true).await;
  let mut ids = Vec::new();
  for fact in network() {
    ids.push(e.assert_fact(fact).await.unwrap().fact.id);
  }

  // Office -> Secure
  e.retract_fact(ids[5]).await.unwrap();
  assert_eq!(active(&e, "Reachable").await, vec![
    text(&["Public", "Office"]),
    text(&["Secure", "Office"]),
  ]);
  assert_eq!(alerts(&e, "downward").await.len(), 1);
}

// ─── Explanation ─────────────────────────────────────────────────────────────

fn elided(node: &Explanation, out: &mut Vec<FactId>) {
  if node.elided {
    out.push(node.fact.id);
  }
  for support in &node.supports {
    for source in &support.sources {
      elided(source, out);
    }
  }
}

#[tokio::test]
async fn explain_reaches_base_facts() {
  let e = engine(NETWORK, true).await;
  let mut ids = Vec::new();
  for fact in network() {
    ids.push(e.assert_fact(fact).await.unwrap().fact.id);
  }

  let alert = e.facts("Alert", false).await.unwrap();
  let downward = alert
    .iter()
    .find(|f| f.values["Kind"] == Value::from("downward"))
    .unwrap();
  let explanation = e.explain(downward.id).await.unwrap().unwrap();
  assert_eq!(explanation.supports.len(), 1);
  assert_eq!(explanation.supports[0].rule, "DownwardFlow");

  let base = explanation.base_facts();
  // Secure -> Office, Secure, Office.
  for id in [ids[6], ids[2], ids[1]] {
    assert!(base.contains(&id), "{id} missing from {base:?}");
  }
  assert!(!base.contains(&ids[3]));
}

#[tokio::test]
async fn explain_elides_circular_support() {
  let e = engine(NETWORK, true).await;
  for fact in network() {
    e.assert_fact(fact).await.unwrap();
  }

  let reach = e.facts("Reachable", false).await.unwrap();
  let public_office = reach
    .iter()
    .find(|f| f.values["From"] == Value::from("Public") && f.values["To"] == Value::from("Office"))
    .unwrap();
  assert_eq!(e.justifications(public_office.id).await.unwrap().len(), 2);

  let explanation = e.explain(public_office.id).await.unwrap().unwrap();
  assert_eq!(explanation.supports.len(), 2);
  let mut out = Vec::new();
  elided(&explanation, &mut out);
  assert!(out.contains(&public_office.id), "{out:?}");
}

#[tokio::test]
async fn explain_missing_fact_is_none() {
  let e = engine(PETS, false).await;
  assert!(e.explain(FactId(99)).await.unwrap().is_none());
  assert!(e.get_fact(FactId(99)).await.unwrap().is_none());
}

/// Number of root-to-leaf paths in `node`.
fn leaves(node: &Explanation) -> usize {
  if node.supports.is_empty() {
    return 1;
  }
  node
    .supports
    .iter()
    .flat_map(|support| &support.sources)
    .map(leaves)
    .sum()
}

fn top_of_diamond(nodes: &[FactInstance]) -> FactId {
  nodes
    .iter()
    .find(|f| f.values["Layer"] == Value::Integer(12) && f.values["Side"] == Value::from("left"))
    .expect("top node")
    .id
}

#[tokio::test]
async fn explain_expands_shared_derivations_on_every_path() {
  let e = engine(DIAMOND, true).await;
  let root = e.assert_fact(NewFact::new("Root").with("Layer", 0_i64)).await.unwrap();
  let nodes = e.facts("Node", false).await.unwrap();
  assert_eq!(nodes.len(), 26);

  let explanation = e.explain(top_of_diamond(&nodes)).await.unwrap().unwrap();
  assert_eq!(explanation.supports.len(), 2);
  assert_eq!(leaves(&explanation), 1 << 12);
  assert_eq!(explanation.base_facts(), vec![root.fact.id]);

  let mut out = Vec::new();
  elided(&explanation, &mut out);
  assert!(out.is_empty(), "{out:?}");
}

#[test]
fn explain_reads_each_shared_fact_once() {
  let spec = Specification::from_yaml(DIAMOND, &options(true)).unwrap();
  let artifact = warrant_sql::compile(&spec, &GenerateOptions::default()).unwrap();
  let conn = rusqlite::Connection::open_in_memory().unwrap();
  conn.execute_batch(&artifact.schema_script()).unwrap();
  Cascade::new(&conn, &artifact, Limits::default())
    .assert(NewFact::new("Root").with("Layer", 0_i64))
    .unwrap();

  let nodes = read::facts(&conn, &artifact, "Node", false).unwrap();
  let mut explainer = Explainer::new(&conn, &artifact);
  let explanation = explainer.explain(top_of_diamond(&nodes)).unwrap().unwrap();
  assert_eq!(leaves(&explanation), 1 << 12);
  // The root and both nodes of layers 0 through 12.
  assert_eq!(explainer.loads(), 1 + 2 * 13);
}

// ─── SQL functions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn regexp_matches_from_the_start_of_the_text() {
  let e = engine_with(HOSTS, &CompileOptions {
    allow_regexp: true,
    ..CompileOptions::default()
  })
  .await;

  for name in ["db12", "web1", "xdb3", "db"] {
    e.assert_fact(NewFact::new("Host").with("Name", name))
      .await
      .unwrap();
  }
  assert_eq!(active(&e, "Internal").await, vec![text(&["db12"])]);
  assert_eq!(
    active(&e, "Public").await,
    vec![text(&["db"]), text(&["web1"]), text(&["xdb3"])]
  );
}

#[tokio::test]
async fn declared_functions_call_sql_functions() {
  let e = engine(LABELS, false).await;
  e.define_function("test_mirror", 1, |ctx| {
    Ok(ctx.get::<String>(0)?.chars().rev().collect::<String>())
  })
  .await
  .unwrap();

  e.assert_fact(NewFact::new("Name").with("Text", "rob"))
    .await
    .unwrap();
  assert_eq!(active(&e, "Label").await, vec![text(&["ROB", "bor"])]);
}

#[tokio::test]
async fn undefined_functions_fail_the_write() {
  let e = engine(LABELS, false).await;
  let err = e
    .assert_fact(NewFact::new("Name").with("Text", "rob"))
    .await
    .unwrap_err();
  assert!(err.to_string().contains("test_mirror"), "{err}");
  assert!(e.facts("Name", true).await.unwrap().is_empty());
}

// ─── Indistinct cycles ───────────────────────────────────────────────────────

#[tokio::test]
async fn bounded_indistinct_cycle_settles_and_unwinds() {
  let e = engine_with(BOUNDED_COUNTER, &CompileOptions {
    allow_indistinct_cycles: true,
    ..CompileOptions::default()
  })
  .await;

  let seed = e
    .assert_fact(NewFact::new("Seed").with("N", 0_i64))
    .await
    .unwrap();
  let counts: Vec<Vec<Value>> = (0..=5_i64).map(|n| vec![Value::Integer(n)]).collect();
  assert_eq!(active(&e, "Count").await, counts);

  // A second seed derives a parallel chain rather than merging.
  e.assert_fact(NewFact::new("Seed").with("N", 4_i64))
    .await
    .unwrap();
  assert_eq!(active(&e, "Count").await.len(), 6 + 2);

  e.retract_fact(seed.fact.id).await.unwrap();
  assert_eq!(
    active(&e, "Count").await,
    vec![vec![Value::Integer(4)], vec![Value::Integer(5)]]
  );
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_unknown_and_derived_schemas() {
  let e = engine(PETS, false).await;

  let err = e
    .assert_fact(NewFact::new("Nope").with("Name", "x"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownSchema(ref s) if s == "Nope"));

  let err = e
    .assert_fact(NewFact::new("IsAPet").with("Person", "a").with("Pet", "b"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::DerivedSchema(_)));
  assert!(e.facts("IsAPet", true).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejects_mismatched_fields() {
  let e = engine(PETS, false).await;

  for fact in [
    NewFact::new("PersonExists"),
    NewFact::new("PersonExists").with("Name", 3_i64),
    NewFact::new("PersonExists").with("Name", "Rob").with("Age", 3_i64),
  ] {
    let err = e.assert_fact(fact).await.unwrap_err();
    assert!(matches!(err, Error::FieldMismatch { .. }), "{err}");
  }
  assert!(e.facts("PersonExists", true).await.unwrap().is_empty());
}

#[tokio::test]
async fn retract_errors() {
  let e = engine(OWNERSHIP, false).await;
  let err = e.retract_fact(FactId(42)).await.unwrap_err();
  assert!(matches!(err, Error::FactNotFound(FactId(42))));

  let owns = e
    .assert_fact(NewFact::new("Owns").with("Person", "Ann").with("Thing", "Cat"))
    .await
    .unwrap();
  let cares = e.facts("Cares", false).await.unwrap().remove(0);
  let err = e.retract_fact(cares.id).await.unwrap_err();
  assert!(matches!(err, Error::DerivedSchema(_)));

  e.retract_fact(owns.fact.id).await.unwrap();
  let err = e.retract_fact(owns.fact.id).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyRetracted(id) if id == owns.fact.id));
}

#[tokio::test]
async fn runaway_cascade_is_rolled_back() {
  let e = engine(COUNTER, true).await.with_limits(Limits {
    max_cascade_steps: 50,
  });

  let err = e
    .assert_fact(NewFact::new("Seed").with("N", 0_i64))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::CascadeLimit(50)));
  assert!(e.facts("Seed", true).await.unwrap().is_empty());
  assert!(e.facts("Count", true).await.unwrap().is_empty());
}

// ─── Confluence ──────────────────────────────────────────────────────────────

/// Active `Reachable` and `Alert` values after asserting `facts` in order and
/// then retracting the ones `keep` marks false.
fn outcome(facts: &[(usize, NewFact)], keep: &[bool]) -> (Vec<Vec<Value>>, Vec<Vec<Value>>) {
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap();
  runtime.block_on(async {
    let e = engine(NETWORK, true).await;
    let mut ids = vec![FactId(0); keep.len()];
    for (index, fact) in facts {
      ids[*index] = e.assert_fact(fact.clone()).await.unwrap().fact.id;
    }
    for (index, fact) in facts {
      if !keep[*index] {
        let retraction = e.retract_fact(ids[*index]).await.unwrap();
        assert_eq!(retraction.fact.schema, fact.schema);
      }
    }
    (active(&e, "Reachable").await, active(&e, "Alert").await)
  })
}

fn all_facts() -> Vec<(usize, NewFact)> {
  let mut facts = network();
  facts.push(exception());
  facts.push(NewFact::new("Link").with("From", "Lab").with("To", "Public"));
  facts.into_iter().enumerate().collect()
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(32))]

  #[test]
  fn insertion_order_does_not_change_the_result(
    order in Just(all_facts()).prop_shuffle(),
  ) {
    let everything = vec![true; order.len()];
    let reference = outcome(&all_facts(), &everything);
    prop_assert_eq!(outcome(&order, &everything), reference);
  }

  #[test]
  fn retraction_matches_never_having_asserted(
    order in Just(all_facts()).prop_shuffle(),
    keep in proptest::collection::vec(any::<bool>(), 9),
  ) {
    let remaining: Vec<(usize, NewFact)> = all_facts()
      .into_iter()
      .filter(|(index, _)| keep[*index])
      .collect();
    let reference = outcome(&remaining, &vec![true; keep.len()]);
    prop_assert_eq!(outcome(&order, &keep), reference);
  }
}
