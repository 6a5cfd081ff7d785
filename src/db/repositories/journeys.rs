use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{discoveries::write_discovery, waypoints::write_waypoint};
use crate::db::{
    connection::Database,
    helpers::{
        from_json, from_optional_json, parse_datetime, parse_optional_datetime, parse_status,
        to_i64, to_json, to_u64,
    },
};
use crate::models::{
    Discovery, Journey, JourneyMetadataUpdate, JourneyStats, JourneyStatus, JourneyTotals,
    JourneyWaypoint,
};

const JOURNEY_COLUMNS: &str = "id, user_id, title, description, start_time, end_time, status,
     route_json, stats_json, discoveries_json, weather_json, photos_json, is_public,
     share_url, tags_json, notes";

/// One page of a user's journey history, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyPage {
    pub journeys: Vec<Journey>,
    pub total: u64,
    pub offset: usize,
}

impl JourneyPage {
    pub fn has_more(&self) -> bool {
        (self.offset + self.journeys.len()) < self.total as usize
    }
}

fn row_to_journey(row: &Row) -> Result<Journey> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let status: String = row.get("status")?;
    let route_json: String = row.get("route_json")?;
    let stats_json: String = row.get("stats_json")?;
    let discoveries_json: String = row.get("discoveries_json")?;
    let weather_json: Option<String> = row.get("weather_json")?;
    let photos_json: String = row.get("photos_json")?;
    let tags_json: String = row.get("tags_json")?;

    Ok(Journey {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        status: parse_status(&status)?,
        route: from_json(&route_json, "route_json")?,
        stats: from_json::<JourneyStats>(&stats_json, "stats_json")?,
        discoveries: from_json(&discoveries_json, "discoveries_json")?,
        weather: from_optional_json(weather_json, "weather_json")?,
        photos: from_json(&photos_json, "photos_json")?,
        is_public: row.get("is_public")?,
        share_url: row.get("share_url")?,
        tags: from_json(&tags_json, "tags_json")?,
        notes: row.get("notes")?,
    })
}

fn collect_journeys(mut rows: rusqlite::Rows<'_>) -> Result<Vec<Journey>> {
    let mut journeys = Vec::new();
    while let Some(row) = rows.next()? {
        journeys.push(row_to_journey(row)?);
    }
    Ok(journeys)
}

/// Escapes LIKE wildcards so a search for "50%" matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Insert or replace a journey. `created_at` survives a re-save.
fn write_journey(conn: &Connection, record: &Journey) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO journeys (
            id, user_id, title, description, start_time, end_time, status,
            route_json, stats_json, discoveries_json, weather_json, photos_json,
            is_public, share_url, tags_json, notes,
            distance_meters, duration_ms, discovery_count, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)
         ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            title = excluded.title,
            description = excluded.description,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            status = excluded.status,
            route_json = excluded.route_json,
            stats_json = excluded.stats_json,
            discoveries_json = excluded.discoveries_json,
            weather_json = excluded.weather_json,
            photos_json = excluded.photos_json,
            is_public = excluded.is_public,
            share_url = excluded.share_url,
            tags_json = excluded.tags_json,
            notes = excluded.notes,
            distance_meters = excluded.distance_meters,
            duration_ms = excluded.duration_ms,
            discovery_count = excluded.discovery_count,
            updated_at = excluded.updated_at",
        params![
            record.id,
            record.user_id,
            record.title,
            record.description,
            record.start_time.to_rfc3339(),
            record.end_time.map(|dt| dt.to_rfc3339()),
            record.status.as_str(),
            to_json(&record.route, "route")?,
            to_json(&record.stats, "stats")?,
            to_json(&record.discoveries, "discoveries")?,
            record
                .weather
                .as_ref()
                .map(|w| to_json(w, "weather"))
                .transpose()?,
            to_json(&record.photos, "photos")?,
            record.is_public,
            record.share_url,
            to_json(&record.tags, "tags")?,
            record.notes,
            record.stats.distance_meters,
            to_i64(record.stats.duration_millis)?,
            record.stats.discovery_count,
            now,
        ],
    )?;
    Ok(())
}

impl Database {
    pub async fn upsert_journey(&self, journey: &Journey) -> Result<()> {
        let record = journey.clone();
        self.execute(move |conn| write_journey(conn, &record)).await
    }

    /// Writes a finished walk in one transaction: its discoveries, the journey
    /// row, then its waypoints. Nothing is stored unless every write succeeds.
    pub async fn finish_journey(
        &self,
        journey: &Journey,
        discoveries: &[Discovery],
        waypoints: &[JourneyWaypoint],
    ) -> Result<()> {
        let journey = journey.clone();
        let discoveries = discoveries.to_vec();
        let waypoints = waypoints.to_vec();
        self.execute_tx(move |tx| {
            for discovery in &discoveries {
                write_discovery(tx, discovery)
                    .with_context(|| format!("failed to save discovery {}", discovery.id))?;
            }
            write_journey(tx, &journey)
                .with_context(|| format!("failed to save journey {}", journey.id))?;
            for waypoint in &waypoints {
                write_waypoint(tx, waypoint)
                    .with_context(|| format!("failed to save waypoint {}", waypoint.id))?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get_journey(&self, journey_id: &str) -> Result<Option<Journey>> {
        let journey_id = journey_id.to_string();
        self.execute(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {JOURNEY_COLUMNS} FROM journeys WHERE id = ?1"))?;
            let mut rows = stmt.query(params![journey_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_journey(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_journeys_by_user(&self, user_id: &str) -> Result<Vec<Journey>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOURNEY_COLUMNS} FROM journeys
                 WHERE user_id = ?1
                 ORDER BY start_time DESC"
            ))?;
            let journeys = collect_journeys(stmt.query(params![user_id])?)?;
            Ok(journeys)
        })
        .await
    }

    pub async fn list_journeys_paginated(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<JourneyPage> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM journeys WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {JOURNEY_COLUMNS} FROM journeys
                 WHERE user_id = ?1
                 ORDER BY start_time DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let journeys =
                collect_journeys(stmt.query(params![user_id, limit as i64, offset as i64])?)?;

            Ok(JourneyPage {
                journeys,
                total: to_u64(total, "journey count")?,
                offset,
            })
        })
        .await
    }

    /// Case-insensitive substring match on title or notes.
    pub async fn search_journeys(&self, user_id: &str, query: &str) -> Result<Vec<Journey>> {
        let user_id = user_id.to_string();
        let pattern = like_pattern(query.trim());
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOURNEY_COLUMNS} FROM journeys
                 WHERE user_id = ?1
                   AND (title LIKE ?2 ESCAPE '\\' OR notes LIKE ?2 ESCAPE '\\')
                 ORDER BY start_time DESC"
            ))?;
            let journeys = collect_journeys(stmt.query(params![user_id, pattern])?)?;
            Ok(journeys)
        })
        .await
    }

    /// Totals over completed journeys only.
    pub async fn journey_totals(&self, user_id: &str) -> Result<JourneyTotals> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let (count, distance, duration, discoveries): (i64, f64, i64, i64) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(distance_meters), 0.0),
                        COALESCE(SUM(duration_ms), 0),
                        COALESCE(SUM(discovery_count), 0)
                 FROM journeys
                 WHERE user_id = ?1 AND status = ?2",
                params![user_id, JourneyStatus::Completed.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

            Ok(JourneyTotals {
                journey_count: to_u64(count, "journey_count")?,
                total_distance_meters: distance,
                total_duration_millis: to_u64(duration, "duration_ms")?,
                total_discoveries: to_u64(discoveries, "discovery_count")?,
            })
        })
        .await
    }

    pub async fn longest_journey(&self, user_id: &str) -> Result<Option<Journey>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOURNEY_COLUMNS} FROM journeys
                 WHERE user_id = ?1 AND status = ?2
                 ORDER BY distance_meters DESC
                 LIMIT 1"
            ))?;
            let mut rows = stmt.query(params![user_id, JourneyStatus::Completed.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_journey(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Edits title, notes, tags and visibility. Status, route and stats are
    /// never touched here.
    pub async fn update_journey_metadata(
        &self,
        journey_id: &str,
        update: JourneyMetadataUpdate,
    ) -> Result<Journey> {
        let journey_id = journey_id.to_string();
        self.execute_tx(move |tx| {
            let current = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {JOURNEY_COLUMNS} FROM journeys WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(params![journey_id])?;
                match rows.next()? {
                    Some(row) => row_to_journey(row)?,
                    None => return Err(anyhow!("Journey not found")),
                }
            };

            let mut journey = current;
            if let Some(title) = update.title {
                journey.title = title;
            }
            if let Some(notes) = update.notes {
                journey.notes = Some(notes).filter(|n| !n.trim().is_empty());
            }
            if let Some(tags) = update.tags {
                journey.tags = tags;
            }
            if let Some(is_public) = update.is_public {
                journey.is_public = is_public;
            }

            tx.execute(
                "UPDATE journeys
                 SET title = ?1,
                     notes = ?2,
                     tags_json = ?3,
                     is_public = ?4,
                     updated_at = ?5
                 WHERE id = ?6",
                params![
                    journey.title,
                    journey.notes,
                    to_json(&journey.tags, "tags")?,
                    journey.is_public,
                    Utc::now().to_rfc3339(),
                    journey_id,
                ],
            )?;

            Ok(journey)
        })
        .await
    }

    /// Deletes a journey and its waypoints. Its discoveries are kept as
    /// standalone records.
    pub async fn delete_journey(&self, journey_id: &str) -> Result<bool> {
        let journey_id = journey_id.to_string();
        self.execute_tx(move |tx| {
            tx.execute(
                "UPDATE discoveries SET journey_id = NULL WHERE journey_id = ?1",
                params![journey_id],
            )?;
            // journey_waypoints go with it via ON DELETE CASCADE
            let rows_affected =
                tx.execute("DELETE FROM journeys WHERE id = ?1", params![journey_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn journey_exists(&self, journey_id: &str) -> Result<bool> {
        let journey_id = journey_id.to_string();
        self.execute(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM journeys WHERE id = ?1",
                    params![journey_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}
