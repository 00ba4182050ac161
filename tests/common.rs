#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rowbatch::{
    spawn_batcher, Batcher, BatcherConfig, InserterConfig, Record, SqliteInserter, State,
};
use rusqlite::types::Value;
use rusqlite::Connection;

/// Test record mirroring a plain application row: generated key plus two
/// payload columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub score: f64,
}

impl Person {
    pub fn numbered(n: usize) -> Self {
        Self {
            id: 0,
            name: format!("Lu_{n}"),
            score: n as f64,
        }
    }
}

impl Record for Person {
    fn id_column() -> &'static str {
        "id"
    }

    fn columns() -> &'static [&'static str] {
        &["name", "score"]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::from(self.name.clone()), Value::from(self.score)]
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

/// Creates a temp-file database with the `people` table.
///
/// File-backed rather than in-memory so the test can open an independent
/// verification connection after the batcher is done with its own.
pub fn create_temp_db(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let conn = Connection::open(&path).expect("initialize database");
    conn.execute(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, score REAL)",
        [],
    )
    .expect("create people table");
    (dir, path)
}

/// Spawns a batcher writing `Person` rows into the database at `path`.
pub fn spawn_people_batcher(
    path: &Path,
    config: BatcherConfig,
    batch_size: usize,
) -> Batcher<Person> {
    let conn = Connection::open(path).expect("open writer connection");
    let inserter: SqliteInserter<Person> =
        SqliteInserter::new(conn, "people", InserterConfig { batch_size });
    spawn_batcher(inserter, config).expect("spawn batcher")
}

/// Reads the whole table back, ordered by primary key.
pub fn read_people(path: &Path) -> Vec<Person> {
    let conn = Connection::open(path).expect("open verification connection");
    let mut stmt = conn
        .prepare("SELECT id, name, score FROM people ORDER BY id")
        .expect("prepare select");
    let rows = stmt
        .query_map([], |row| {
            Ok(Person {
                id: row.get(0)?,
                name: row.get(1)?,
                score: row.get(2)?,
            })
        })
        .expect("query people");
    rows.map(|r| r.expect("scan person")).collect()
}

/// Resolves every state and asserts the submission ↔ row mapping is a
/// bijection: each submission's resolved ID names a row carrying exactly
/// that submission's payload.
pub async fn assert_rows_match_states(path: &Path, submitted: &[(Person, State)]) {
    let rows = read_people(path);
    assert_eq!(rows.len(), submitted.len());

    let by_id: HashMap<i64, &Person> = rows.iter().map(|p| (p.id, p)).collect();
    assert_eq!(by_id.len(), rows.len(), "duplicate primary keys in table");

    for (person, state) in submitted {
        state.error().await.expect("state resolved with error");
        let id = state.id().await.expect("state has no id");
        assert!(id > 0);

        let row = by_id
            .get(&id)
            .unwrap_or_else(|| panic!("no row for resolved id {id}"));
        assert_eq!(row.name, person.name);
        assert_eq!(row.score, person.score);
    }
}
