//! SQLite persistence for published generations.
//!
//! Every row is tagged with the generation that wrote it. `meta.active_generation`
//! is updated in the same transaction as the rows, so a reader either sees the
//! complete new generation or the complete old one.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use scout_core::{AppError, AppResult};
use std::collections::HashMap;
use std::path::Path;

use crate::embeddings::EmbeddingFingerprint;
use crate::generation::{CachedFacts, Generation, GenerationId};
use crate::graph::{DependencyGraph, Edge, EdgeKind, Entity, EntityKind, FragmentFacts};
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::semantic::{bytes_to_vector, vector_to_bytes, SemanticIndex, VectorEntry};
use crate::store::FragmentStore;
use crate::types::{BuildDiagnostics, Fragment, FragmentId, FragmentKind};

const ACTIVE_GENERATION: &str = "active_generation";

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Index(format!("{}: {}", context, e))
}

/// Open (creating if needed) the index database.
pub fn open_index(db_path: &Path) -> AppResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Index(format!("Failed to create index directory: {}", e))
            })?;
        }
    }

    let conn = Connection::open(db_path).map_err(db_err("Failed to open SQLite index"))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS generations (
            id INTEGER PRIMARY KEY,
            created_at TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            k1 REAL NOT NULL,
            b REAL NOT NULL,
            drop_stop_words INTEGER NOT NULL,
            unresolved INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fragments (
            generation INTEGER NOT NULL,
            id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            symbol TEXT,
            PRIMARY KEY (generation, id)
        );

        CREATE TABLE IF NOT EXISTS postings (
            generation INTEGER NOT NULL,
            term TEXT NOT NULL,
            fragment_id TEXT NOT NULL,
            tf INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vectors (
            generation INTEGER NOT NULL,
            fragment_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            vector BLOB NOT NULL,
            PRIMARY KEY (generation, fragment_id)
        );

        CREATE TABLE IF NOT EXISTS entities (
            generation INTEGER NOT NULL,
            qualified_name TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            fragment_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            PRIMARY KEY (generation, qualified_name)
        );

        CREATE TABLE IF NOT EXISTS edges (
            generation INTEGER NOT NULL,
            source TEXT NOT NULL,
            target TEXT NOT NULL,
            kind TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS facts (
            generation INTEGER NOT NULL,
            fragment_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            facts TEXT,
            error TEXT,
            PRIMARY KEY (generation, fragment_id)
        );

        CREATE INDEX IF NOT EXISTS idx_postings_generation ON postings(generation);
        CREATE INDEX IF NOT EXISTS idx_edges_generation ON edges(generation);
        "#,
    )
    .map_err(db_err("Failed to create tables"))?;

    tracing::debug!("Opened SQLite index at {:?}", db_path);
    Ok(conn)
}

/// Generation currently marked active, if any.
pub fn active_generation(conn: &Connection) -> AppResult<Option<GenerationId>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![ACTIVE_GENERATION],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err("Failed to read active generation"))?;

    value
        .map(|v| {
            v.parse::<u64>()
                .map(GenerationId)
                .map_err(|e| AppError::Index(format!("Corrupt active generation '{}': {}", v, e)))
        })
        .transpose()
}

/// Active generation recorded at `db_path`, or `None` when there is no index file yet.
pub fn stored_generation(db_path: &Path) -> AppResult<Option<GenerationId>> {
    if !db_path.exists() {
        return Ok(None);
    }
    let conn = open_index(db_path)?;
    active_generation(&conn)
}

/// Write `generation` and make it the active one, replacing whatever was stored.
///
/// Fails if the index already holds a newer generation.
pub fn save_generation(db_path: &Path, generation: &Generation) -> AppResult<()> {
    let mut conn = open_index(db_path)?;
    let tx = conn
        .transaction()
        .map_err(db_err("Failed to begin transaction"))?;
    let gen = generation.id.0 as i64;

    if let Some(active) = active_generation(&tx)? {
        if active > generation.id {
            return Err(AppError::Index(format!(
                "Refusing to save generation {} over newer generation {}",
                generation.id, active
            )));
        }
    }

    // The index holds exactly one generation; re-saving the active id replaces it.
    for table in ["fragments", "postings", "vectors", "entities", "edges", "facts", "generations"] {
        tx.execute(&format!("DELETE FROM {}", table), [])
            .map_err(db_err("Failed to clear previous generation rows"))?;
    }

    {
        let fingerprint = generation.semantic.fingerprint();
        let params_ = generation.lexical.params();
        tx.execute(
            "INSERT OR REPLACE INTO generations
             (id, created_at, provider, model, dimensions, k1, b, drop_stop_words, unresolved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                gen,
                generation.created_at.to_rfc3339(),
                fingerprint.provider,
                fingerprint.model,
                fingerprint.dimensions as i64,
                params_.k1 as f64,
                params_.b as f64,
                params_.drop_stop_words,
                generation.graph.unresolved() as i64,
            ],
        )
        .map_err(db_err("Failed to insert generation"))?;

        let mut insert_fragment = tx
            .prepare(
                "INSERT INTO fragments
                 (generation, id, source_path, start_line, end_line, kind, text, symbol)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(db_err("Failed to prepare fragment insert"))?;
        for fragment in generation.store.iter() {
            insert_fragment
                .execute(params![
                    gen,
                    fragment.id.as_str(),
                    fragment.source_path,
                    fragment.start_line,
                    fragment.end_line,
                    fragment.kind.as_str(),
                    fragment.text,
                    fragment.symbol,
                ])
                .map_err(db_err("Failed to insert fragment"))?;
        }

        let mut insert_posting = tx
            .prepare("INSERT INTO postings (generation, term, fragment_id, tf) VALUES (?1, ?2, ?3, ?4)")
            .map_err(db_err("Failed to prepare posting insert"))?;
        for (term, id, tf) in generation.lexical.postings() {
            insert_posting
                .execute(params![gen, term, id.as_str(), tf])
                .map_err(db_err("Failed to insert posting"))?;
        }

        let mut insert_vector = tx
            .prepare(
                "INSERT INTO vectors (generation, fragment_id, content_hash, vector)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(db_err("Failed to prepare vector insert"))?;
        for (id, entry) in generation.semantic.entries() {
            insert_vector
                .execute(params![
                    gen,
                    id.as_str(),
                    entry.content_hash,
                    vector_to_bytes(&entry.vector),
                ])
                .map_err(db_err("Failed to insert vector"))?;
        }

        let mut insert_entity = tx
            .prepare(
                "INSERT INTO entities (generation, qualified_name, name, kind, fragment_id, file_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(db_err("Failed to prepare entity insert"))?;
        for entity in generation.graph.entities() {
            insert_entity
                .execute(params![
                    gen,
                    entity.qualified_name,
                    entity.name,
                    entity.kind.as_str(),
                    entity.fragment_id.as_str(),
                    entity.file_path,
                ])
                .map_err(db_err("Failed to insert entity"))?;
        }

        let mut insert_edge = tx
            .prepare("INSERT INTO edges (generation, source, target, kind) VALUES (?1, ?2, ?3, ?4)")
            .map_err(db_err("Failed to prepare edge insert"))?;
        for edge in generation.graph.edges() {
            insert_edge
                .execute(params![gen, edge.source, edge.target, edge.kind.as_str()])
                .map_err(db_err("Failed to insert edge"))?;
        }

        let mut insert_facts = tx
            .prepare(
                "INSERT INTO facts (generation, fragment_id, content_hash, facts, error)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(db_err("Failed to prepare facts insert"))?;
        for (id, cached) in &generation.facts {
            let (facts, error) = match &cached.outcome {
                Ok(facts) => (Some(serde_json::to_string(facts)?), None),
                Err(reason) => (None, Some(reason.as_str())),
            };
            insert_facts
                .execute(params![gen, id.as_str(), cached.content_hash, facts, error])
                .map_err(db_err("Failed to insert facts"))?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![ACTIVE_GENERATION, generation.id.0.to_string()],
        )
        .map_err(db_err("Failed to update active generation"))?;
    }

    tx.commit().map_err(db_err("Failed to commit generation"))?;

    tracing::info!(
        "Saved generation {} ({} fragments) to {:?}",
        generation.id,
        generation.store.len(),
        db_path
    );
    Ok(())
}

/// Load the active generation.
///
/// When `expected` is given and differs from the stored active generation the
/// load fails with `StaleGeneration`.
pub fn load_generation(db_path: &Path, expected: Option<GenerationId>) -> AppResult<Generation> {
    if !db_path.exists() {
        return Err(AppError::Index(format!(
            "No index at {}. Run 'scout index' first.",
            db_path.display()
        )));
    }

    let conn = open_index(db_path)?;
    let active = active_generation(&conn)?
        .ok_or_else(|| AppError::Index("Index has no active generation".to_string()))?;

    if let Some(expected) = expected {
        if expected != active {
            return Err(AppError::StaleGeneration {
                expected: expected.0,
                found: active.0,
            });
        }
    }

    let gen = active.0 as i64;

    let (created_at, fingerprint, bm25, unresolved) = conn
        .query_row(
            "SELECT created_at, provider, model, dimensions, k1, b, drop_stop_words, unresolved
             FROM generations WHERE id = ?1",
            params![gen],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    EmbeddingFingerprint::new(
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)? as usize,
                    ),
                    Bm25Params {
                        k1: row.get::<_, f64>(4)? as f32,
                        b: row.get::<_, f64>(5)? as f32,
                        drop_stop_words: row.get(6)?,
                    },
                    row.get::<_, i64>(7)? as usize,
                ))
            },
        )
        .map_err(db_err("Failed to read generation"))?;

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Index(format!("Corrupt generation timestamp: {}", e)))?;

    let fragments = load_fragments(&conn, gen)?;
    let mut store = FragmentStore::new();
    let mut diagnostics = BuildDiagnostics::default();
    store.apply(fragments, &[], &mut diagnostics);
    if !diagnostics.rejected.is_empty() {
        return Err(AppError::Index(format!(
            "Stored generation {} contains {} invalid fragments",
            active,
            diagnostics.rejected.len()
        )));
    }

    let postings = query_rows(
        &conn,
        "SELECT term, fragment_id, tf FROM postings WHERE generation = ?1",
        gen,
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                FragmentId::new(row.get::<_, String>(1)?),
                row.get::<_, u32>(2)?,
            ))
        },
    )?;
    let lexical = LexicalIndex::from_postings(bm25, store.iter().map(|f| f.id.clone()), postings);

    let vectors = query_rows(
        &conn,
        "SELECT fragment_id, content_hash, vector FROM vectors WHERE generation = ?1",
        gen,
        |row| {
            Ok((
                FragmentId::new(row.get::<_, String>(0)?),
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        },
    )?;
    let mut entries = Vec::with_capacity(vectors.len());
    for (id, content_hash, blob) in vectors {
        entries.push((
            id,
            VectorEntry {
                content_hash,
                vector: bytes_to_vector(&blob)?.into(),
            },
        ));
    }
    let semantic = SemanticIndex::from_entries(fingerprint, entries)?;

    let entity_rows = query_rows(
        &conn,
        "SELECT qualified_name, name, kind, fragment_id, file_path FROM entities WHERE generation = ?1",
        gen,
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        },
    )?;
    let mut entities = Vec::with_capacity(entity_rows.len());
    for (qualified_name, name, kind, fragment_id, file_path) in entity_rows {
        let kind = EntityKind::parse(&kind)
            .ok_or_else(|| AppError::Index(format!("Unknown entity kind '{}'", kind)))?;
        entities.push(Entity {
            qualified_name,
            name,
            kind,
            fragment_id: FragmentId::new(fragment_id),
            file_path,
        });
    }

    let edge_rows = query_rows(
        &conn,
        "SELECT source, target, kind FROM edges WHERE generation = ?1",
        gen,
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )?;
    let mut edges = Vec::with_capacity(edge_rows.len());
    for (source, target, kind) in edge_rows {
        let kind = EdgeKind::parse(&kind)
            .ok_or_else(|| AppError::Index(format!("Unknown edge kind '{}'", kind)))?;
        edges.push(Edge {
            source,
            target,
            kind,
        });
    }
    let mut graph = DependencyGraph::from_parts(entities, edges, unresolved);
    let pruned = graph.prune(&store);
    if pruned > 0 {
        tracing::warn!("Dropped {} entities without a defining fragment", pruned);
    }

    let fact_rows = query_rows(
        &conn,
        "SELECT fragment_id, content_hash, facts, error FROM facts WHERE generation = ?1",
        gen,
        |row| {
            Ok((
                FragmentId::new(row.get::<_, String>(0)?),
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    )?;
    let mut facts = HashMap::with_capacity(fact_rows.len());
    for (id, content_hash, json, error) in fact_rows {
        let outcome = match (json, error) {
            (Some(json), _) => Ok(serde_json::from_str::<FragmentFacts>(&json)?),
            (None, Some(error)) => Err(error),
            (None, None) => Err("missing extraction result".to_string()),
        };
        facts.insert(
            id,
            CachedFacts {
                content_hash,
                outcome,
            },
        );
    }

    tracing::info!(
        "Loaded generation {} ({} fragments) from {:?}",
        active,
        store.len(),
        db_path
    );

    Ok(Generation {
        id: active,
        created_at,
        store,
        lexical,
        semantic,
        graph,
        facts,
    })
}

fn load_fragments(conn: &Connection, gen: i64) -> AppResult<Vec<Fragment>> {
    let rows = query_rows(
        conn,
        "SELECT id, source_path, start_line, end_line, kind, text, symbol
         FROM fragments WHERE generation = ?1",
        gen,
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        },
    )?;

    rows.into_iter()
        .map(|(id, source_path, start_line, end_line, kind, text, symbol)| {
            let kind = FragmentKind::parse(&kind)
                .ok_or_else(|| AppError::Index(format!("Unknown fragment kind '{}'", kind)))?;
            Ok(Fragment {
                id: FragmentId::new(id),
                source_path,
                start_line,
                end_line,
                kind,
                text,
                symbol,
            })
        })
        .collect()
}

fn query_rows<T>(
    conn: &Connection,
    sql: &str,
    gen: i64,
    map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> AppResult<Vec<T>> {
    let mut stmt = conn.prepare(sql).map_err(db_err("Failed to prepare query"))?;
    let rows = stmt
        .query_map(params![gen], map)
        .map_err(db_err("Failed to run query"))?;
    rows.collect::<Result<Vec<T>, _>>()
        .map_err(db_err("Failed to read row"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use crate::generation::build_generation;
    use crate::graph::{Direction, ExtractorRegistry};
    use tempfile::TempDir;

    async fn sample_generation(id: u64) -> Generation {
        let fragment = |fid: &str, path: &str, kind: FragmentKind, text: &str| Fragment {
            id: FragmentId::new(fid),
            source_path: path.to_string(),
            start_line: 1,
            end_line: 4,
            kind,
            text: text.to_string(),
            symbol: Some(fid.to_string()),
        };

        let (generation, _) = build_generation(
            None,
            GenerationId(id),
            vec![
                fragment(
                    "density",
                    "physics.py",
                    FragmentKind::CodeFunction,
                    "def density(grid):\n    return mass(grid) / grid.volume\n",
                ),
                fragment(
                    "mass",
                    "physics.py",
                    FragmentKind::CodeFunction,
                    "def mass(grid):\n    return sum(grid.cells)\n",
                ),
                fragment("broken", "bad.py", FragmentKind::CodeFunction, "def broken(:\n"),
                fragment(
                    "readme",
                    "README.md",
                    FragmentKind::ProseBlock,
                    "Density is computed per grid cell.",
                ),
            ],
            &[],
            &TrigramProvider::new(32),
            &RetrievalConfig::default(),
            &ExtractorRegistry::with_defaults(),
        )
        .await
        .unwrap();
        generation
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.sqlite");
        let original = sample_generation(3).await;

        save_generation(&path, &original).unwrap();
        let loaded = load_generation(&path, Some(GenerationId(3))).unwrap();

        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.store.len(), original.store.len());
        assert_eq!(
            loaded.lexical.search("grid density", 4),
            original.lexical.search("grid density", 4)
        );
        assert_eq!(loaded.semantic.fingerprint(), original.semantic.fingerprint());
        assert_eq!(loaded.semantic.len(), original.semantic.len());
        assert_eq!(loaded.graph.entity_count(), original.graph.entity_count());
        assert_eq!(loaded.graph.edge_count(), original.graph.edge_count());
        assert_eq!(
            loaded.graph.neighbors("density", Direction::Callees, 1).len(),
            1
        );
        assert_eq!(loaded.facts, original.facts);
        assert!(loaded.facts[&FragmentId::new("broken")].outcome.is_err());
    }

    #[tokio::test]
    async fn test_stale_generation_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.sqlite");

        save_generation(&path, &sample_generation(1).await).unwrap();
        save_generation(&path, &sample_generation(2).await).unwrap();

        let err = load_generation(&path, Some(GenerationId(1))).unwrap_err();
        assert!(matches!(
            err,
            AppError::StaleGeneration {
                expected: 1,
                found: 2
            }
        ));

        let conn = open_index(&path).unwrap();
        assert_eq!(active_generation(&conn).unwrap(), Some(GenerationId(2)));
        let old_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM fragments WHERE generation = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(old_rows, 0);
    }

    #[test]
    fn test_missing_index() {
        let dir = TempDir::new().unwrap();
        let err = load_generation(&dir.path().join("none.sqlite"), None).unwrap_err();
        assert!(matches!(err, AppError::Index(_)));
    }
}
