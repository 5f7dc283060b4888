//! Index SQLite des fragments en cache
//!
//! Chaque fragment écrit sur disque possède une ligne dans la table `spans`.
//! L'index permet de savoir si une plage est déjà présente sans toucher au
//! système de fichiers, et d'énumérer les partitions d'un média.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::keys::SpanKey;

/// Ligne de l'index
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SpanEntry {
    /// Hash de l'identifiant du média
    pub media_key: String,
    /// Identifiant du média en clair
    pub media_id: String,
    /// Partition de qualité
    pub quality: String,
    /// Hash de l'URI téléchargée
    pub resource: String,
    pub offset: u64,
    /// Longueur demandée (`None` pour une plage ouverte)
    pub length: Option<u64>,
    /// Octets réellement stockés
    pub stored_bytes: u64,
    /// Date de dernière utilisation (RFC3339)
    pub last_used: String,
}

/// Base de données SQLite de l'index des fragments
#[derive(Debug)]
pub struct SpanIndex {
    conn: Mutex<Connection>,
}

impl SpanIndex {
    /// Ouvre (ou crée) l'index
    pub fn init(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Index volatile, utile quand le cache n'a pas de répertoire persistant
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spans (
                media_key TEXT NOT NULL,
                media_id TEXT NOT NULL,
                quality TEXT NOT NULL,
                resource TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                length TEXT NOT NULL,
                stored_bytes INTEGER NOT NULL,
                last_used TEXT NOT NULL,
                PRIMARY KEY (media_key, quality, resource, start_offset, length)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_spans_partition ON spans (media_key, quality)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enregistre un fragment (ou rafraîchit sa date d'utilisation)
    pub fn add_span(&self, key: &SpanKey, media_id: &str, stored_bytes: u64) -> rusqlite::Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO spans (media_key, media_id, quality, resource, start_offset, length, stored_bytes, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(media_key, quality, resource, start_offset, length) DO UPDATE SET
                 stored_bytes = excluded.stored_bytes,
                 last_used = excluded.last_used",
            params![
                key.media_key,
                media_id,
                key.quality,
                key.resource,
                key.range.offset as i64,
                key.length_label(),
                stored_bytes as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Indique si le fragment exact est indexé
    pub fn contains(&self, key: &SpanKey) -> rusqlite::Result<bool> {
        let conn = self.lock_conn();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM spans
                 WHERE media_key = ?1 AND quality = ?2 AND resource = ?3 AND start_offset = ?4 AND length = ?5",
                params![
                    key.media_key,
                    key.quality,
                    key.resource,
                    key.range.offset as i64,
                    key.length_label(),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Met à jour la date de dernier accès d'un fragment
    pub fn touch(&self, key: &SpanKey) -> rusqlite::Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE spans SET last_used = ?1
             WHERE media_key = ?2 AND quality = ?3 AND resource = ?4 AND start_offset = ?5 AND length = ?6",
            params![
                Utc::now().to_rfc3339(),
                key.media_key,
                key.quality,
                key.resource,
                key.range.offset as i64,
                key.length_label(),
            ],
        )?;
        Ok(())
    }

    /// Partitions de qualité connues pour un média
    pub fn qualities(&self, media_key: &str) -> rusqlite::Result<Vec<String>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT quality FROM spans WHERE media_key = ?1 ORDER BY quality")?;
        let qualities = stmt
            .query_map([media_key], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(qualities)
    }

    /// Fragments d'une partition
    pub fn spans_in(&self, media_key: &str, quality: &str) -> rusqlite::Result<Vec<SpanEntry>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT media_key, media_id, quality, resource, start_offset, length, stored_bytes, last_used
             FROM spans WHERE media_key = ?1 AND quality = ?2 ORDER BY resource, start_offset",
        )?;
        let entries = stmt
            .query_map([media_key, quality], |row| {
                let length: String = row.get(5)?;
                let offset: i64 = row.get(4)?;
                let stored: i64 = row.get(6)?;
                Ok(SpanEntry {
                    media_key: row.get(0)?,
                    media_id: row.get(1)?,
                    quality: row.get(2)?,
                    resource: row.get(3)?,
                    offset: offset as u64,
                    length: length.parse().ok(),
                    stored_bytes: stored as u64,
                    last_used: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Supprime l'index d'une partition de qualité
    pub fn delete_quality(&self, media_key: &str, quality: &str) -> rusqlite::Result<usize> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM spans WHERE media_key = ?1 AND quality = ?2",
            [media_key, quality],
        )
    }

    /// Supprime l'index de toutes les partitions d'un média
    pub fn delete_media(&self, media_key: &str) -> rusqlite::Result<usize> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM spans WHERE media_key = ?1", [media_key])
    }

    /// Purge toutes les entrées
    pub fn purge(&self) -> rusqlite::Result<()> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM spans", [])?;
        Ok(())
    }

    /// Nombre total de fragments indexés
    pub fn count(&self) -> rusqlite::Result<usize> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM spans", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
