use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{from_json, from_optional_json, parse_datetime, parse_discovery_type, to_json},
};
use crate::models::Discovery;

const DISCOVERY_COLUMNS: &str = "id, journey_id, discovery_type, timestamp, location_json,
     media_url, thumbnail_url, identification_json, user_notes, is_favorite, is_public, tags_json";

fn row_to_discovery(row: &Row) -> Result<Discovery> {
    let discovery_type: String = row.get("discovery_type")?;
    let timestamp: String = row.get("timestamp")?;
    let location_json: Option<String> = row.get("location_json")?;
    let identification_json: Option<String> = row.get("identification_json")?;
    let tags_json: String = row.get("tags_json")?;

    Ok(Discovery {
        id: row.get("id")?,
        journey_id: row.get("journey_id")?,
        discovery_type: parse_discovery_type(&discovery_type)?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        location: from_optional_json(location_json, "location_json")?,
        media_url: row.get("media_url")?,
        thumbnail_url: row.get("thumbnail_url")?,
        identification_result: from_optional_json(identification_json, "identification_json")?,
        user_notes: row.get("user_notes")?,
        is_favorite: row.get("is_favorite")?,
        is_public: row.get("is_public")?,
        tags: from_json(&tags_json, "tags_json")?,
    })
}

fn query_discoveries(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Discovery>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DISCOVERY_COLUMNS} FROM discoveries {filter}"
    ))?;
    let mut rows = stmt.query(params)?;
    let mut discoveries = Vec::new();
    while let Some(row) = rows.next()? {
        discoveries.push(row_to_discovery(row)?);
    }
    Ok(discoveries)
}

/// Insert or replace. A discovery is written when it is marked and again
/// when its walk ends, so this must be idempotent.
pub(super) fn write_discovery(conn: &Connection, record: &Discovery) -> Result<()> {
    conn.execute(
        "INSERT INTO discoveries (
            id, journey_id, discovery_type, timestamp, location_json, media_url,
            thumbnail_url, identification_json, species_name, user_notes,
            is_favorite, is_public, tags_json, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(id) DO UPDATE SET
            journey_id = excluded.journey_id,
            discovery_type = excluded.discovery_type,
            timestamp = excluded.timestamp,
            location_json = excluded.location_json,
            media_url = excluded.media_url,
            thumbnail_url = excluded.thumbnail_url,
            identification_json = excluded.identification_json,
            species_name = excluded.species_name,
            user_notes = excluded.user_notes,
            is_public = excluded.is_public,
            tags_json = excluded.tags_json",
        params![
            record.id,
            record.journey_id,
            record.discovery_type.as_str(),
            record.timestamp.to_rfc3339(),
            record
                .location
                .as_ref()
                .map(|l| to_json(l, "location"))
                .transpose()?,
            record.media_url,
            record.thumbnail_url,
            record
                .identification_result
                .as_ref()
                .map(|m| to_json(m, "identification result"))
                .transpose()?,
            record.species_name(),
            record.user_notes,
            record.is_favorite,
            record.is_public,
            to_json(&record.tags, "tags")?,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl Database {
    pub async fn upsert_discovery(&self, discovery: &Discovery) -> Result<()> {
        let record = discovery.clone();
        self.execute(move |conn| write_discovery(conn, &record)).await
    }

    pub async fn get_discovery(&self, discovery_id: &str) -> Result<Option<Discovery>> {
        let discovery_id = discovery_id.to_string();
        self.execute(move |conn| {
            Ok(query_discoveries(conn, "WHERE id = ?1", params![discovery_id])?
                .into_iter()
                .next())
        })
        .await
    }

    pub async fn list_discoveries_for_journey(&self, journey_id: &str) -> Result<Vec<Discovery>> {
        let journey_id = journey_id.to_string();
        self.execute(move |conn| {
            query_discoveries(
                conn,
                "WHERE journey_id = ?1 ORDER BY timestamp ASC",
                params![journey_id],
            )
        })
        .await
    }

    /// Discoveries outside any journey: single captures and the survivors of
    /// cancelled walks.
    pub async fn list_standalone_discoveries(&self) -> Result<Vec<Discovery>> {
        self.execute(|conn| {
            query_discoveries(
                conn,
                "WHERE journey_id IS NULL ORDER BY timestamp DESC",
                params![],
            )
        })
        .await
    }

    pub async fn list_favorite_discoveries(&self) -> Result<Vec<Discovery>> {
        self.execute(|conn| {
            query_discoveries(
                conn,
                "WHERE is_favorite = 1 ORDER BY timestamp DESC",
                params![],
            )
        })
        .await
    }

    pub async fn set_discovery_favorite(&self, discovery_id: &str, favorite: bool) -> Result<()> {
        let discovery_id = discovery_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE discoveries SET is_favorite = ?1 WHERE id = ?2",
                params![favorite, discovery_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Discovery not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_discovery(&self, discovery_id: &str) -> Result<bool> {
        let discovery_id = discovery_id.to_string();
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM discoveries WHERE id = ?1", params![discovery_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn detach_discoveries(&self, journey_id: &str) -> Result<usize> {
        let journey_id = journey_id.to_string();
        self.execute(move |conn| {
            Ok(conn.execute(
                "UPDATE discoveries SET journey_id = NULL WHERE journey_id = ?1",
                params![journey_id],
            )?)
        })
        .await
    }

    /// Detaches discoveries whose walk never produced a journey row, which
    /// happens when the process dies mid-session. Only safe while no session
    /// is running.
    pub async fn detach_orphaned_discoveries(&self) -> Result<usize> {
        self.execute(|conn| {
            Ok(conn.execute(
                "UPDATE discoveries
                 SET journey_id = NULL
                 WHERE journey_id IS NOT NULL
                   AND journey_id NOT IN (SELECT id FROM journeys)",
                [],
            )?)
        })
        .await
    }
}
