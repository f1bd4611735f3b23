//! Embedding storage and nearest-neighbor search.

use crate::{db_err, SqliteStore};
use roster_core::types::rank_neighbors;
use roster_core::{Embedding, EmbeddingStore, Identity, IdentitySummary, Neighbor, RosterError};
use rusqlite::params;

impl EmbeddingStore for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert_identity(&self, identity: &Identity) -> Result<(), RosterError> {
        self.conn()?
            .execute(
                r#"
                INSERT INTO identities (code, name) VALUES (?1, ?2)
                ON CONFLICT(code) DO UPDATE SET name = excluded.name
                "#,
                params![identity.code, identity.name],
            )
            .map_err(db_err)?;
        tracing::info!(identity = %identity.code, name = %identity.name, "identity saved");
        Ok(())
    }

    fn add(&self, identity_code: &str, embedding: &[f32]) -> Result<(), RosterError> {
        let embedding = Embedding::with_dimension(embedding, self.dimension)?;
        let conn = self.conn()?;

        let known: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM identities WHERE code = ?1)",
                [identity_code],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if !known {
            return Err(RosterError::UnknownIdentity(identity_code.to_string()));
        }

        conn.execute(
            "INSERT INTO embeddings (identity_code, vector) VALUES (?1, ?2)",
            params![identity_code, embedding_to_bytes(embedding.values())],
        )
        .map_err(db_err)?;
        tracing::info!(identity = identity_code, dim = embedding.dim(), "embedding enrolled");
        Ok(())
    }

    /// One transaction: a failure anywhere leaves the database untouched.
    fn enroll(&self, identity: &Identity, embeddings: &[Vec<f32>]) -> Result<usize, RosterError> {
        let validated = embeddings
            .iter()
            .map(|raw| Embedding::with_dimension(raw, self.dimension))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            r#"
            INSERT INTO identities (code, name) VALUES (?1, ?2)
            ON CONFLICT(code) DO UPDATE SET name = excluded.name
            "#,
            params![identity.code, identity.name],
        )
        .map_err(db_err)?;
        {
            let mut insert = tx
                .prepare("INSERT INTO embeddings (identity_code, vector) VALUES (?1, ?2)")
                .map_err(db_err)?;
            for embedding in &validated {
                insert
                    .execute(params![identity.code, embedding_to_bytes(embedding.values())])
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;

        tracing::info!(
            identity = %identity.code,
            added = validated.len(),
            "identity enrolled"
        );
        Ok(validated.len())
    }

    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RosterError> {
        let query = Embedding::with_dimension(query, self.dimension)?;
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare("SELECT identity_code, vector FROM embeddings ORDER BY id")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            rows
        };

        let gallery = rows
            .into_iter()
            .map(|(code, bytes)| {
                let values = bytes_to_embedding(&bytes);
                let stored = Embedding::with_dimension(&values, self.dimension).map_err(|e| {
                    RosterError::CorruptRecord(format!("stored embedding for {code}: {e}"))
                })?;
                Ok((code, stored))
            })
            .collect::<Result<Vec<_>, RosterError>>()?;

        Ok(rank_neighbors(
            &query,
            gallery.iter().map(|(code, e)| (code.as_str(), e)),
            k,
        ))
    }

    fn identities(&self) -> Result<Vec<IdentitySummary>, RosterError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT i.code, i.name, COUNT(e.id)
                FROM identities i
                LEFT JOIN embeddings e ON e.identity_code = i.code
                GROUP BY i.code
                ORDER BY i.code
                "#,
            )
            .map_err(db_err)?;

        let summaries = stmt
            .query_map([], |row| {
                Ok(IdentitySummary {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    embedding_count: row.get::<_, i64>(2)? as usize,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(summaries)
    }
}

/// Little-endian f32 packing.
fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &val in values {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
