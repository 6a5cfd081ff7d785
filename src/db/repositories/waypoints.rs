use anyhow::Result;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{from_json, parse_datetime, to_json},
};
use crate::models::JourneyWaypoint;

fn row_to_waypoint(row: &Row) -> Result<JourneyWaypoint> {
    let location_json: String = row.get("location_json")?;
    let timestamp: String = row.get("timestamp")?;

    Ok(JourneyWaypoint {
        id: row.get("id")?,
        journey_id: row.get("journey_id")?,
        location: from_json(&location_json, "location_json")?,
        title: row.get("title")?,
        description: row.get("description")?,
        icon: row.get("icon")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
    })
}

/// The owning journey must already be stored.
pub(super) fn write_waypoint(conn: &Connection, record: &JourneyWaypoint) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO journey_waypoints
            (id, journey_id, location_json, title, description, icon, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id,
            record.journey_id,
            to_json(&record.location, "location")?,
            record.title,
            record.description,
            record.icon,
            record.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl Database {
    pub async fn upsert_waypoint(&self, waypoint: &JourneyWaypoint) -> Result<()> {
        let record = waypoint.clone();
        self.execute(move |conn| write_waypoint(conn, &record)).await
    }

    pub async fn get_waypoint(&self, waypoint_id: &str) -> Result<Option<JourneyWaypoint>> {
        let waypoint_id = waypoint_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, journey_id, location_json, title, description, icon, timestamp
                 FROM journey_waypoints
                 WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![waypoint_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_waypoint(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_waypoints_for_journey(&self, journey_id: &str) -> Result<Vec<JourneyWaypoint>> {
        let journey_id = journey_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, journey_id, location_json, title, description, icon, timestamp
                 FROM journey_waypoints
                 WHERE journey_id = ?1
                 ORDER BY timestamp ASC",
            )?;

            let mut rows = stmt.query(params![journey_id])?;
            let mut waypoints = Vec::new();
            while let Some(row) = rows.next()? {
                waypoints.push(row_to_waypoint(row)?);
            }
            Ok(waypoints)
        })
        .await
    }

    pub async fn delete_waypoint(&self, waypoint_id: &str) -> Result<bool> {
        let waypoint_id = waypoint_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "DELETE FROM journey_waypoints WHERE id = ?1",
                params![waypoint_id],
            )?;
            Ok(rows_affected > 0)
        })
        .await
    }
}
