use anyhow::{Context, Result};

use crate::{
    identification::BoxFuture,
    models::{Discovery, Journey, JourneyWaypoint},
};

/// Durable store for finished journeys and their discoveries/waypoints.
///
/// The engine only calls this at mark/save events and session boundaries,
/// never per tick.
pub trait JourneyStore: Send + Sync {
    fn save_journey<'a>(&'a self, journey: &'a Journey) -> BoxFuture<'a, Result<()>>;
    fn save_discovery<'a>(&'a self, discovery: &'a Discovery) -> BoxFuture<'a, Result<()>>;
    fn save_waypoint<'a>(&'a self, waypoint: &'a JourneyWaypoint) -> BoxFuture<'a, Result<()>>;

    /// Stores a finished walk: discoveries, then the journey, then waypoints.
    ///
    /// The default writes one record at a time and stops at the first error,
    /// which can leave the journey row behind. Stores with transactions
    /// should override it so a failure writes nothing.
    fn finish_journey<'a>(
        &'a self,
        journey: &'a Journey,
        discoveries: &'a [Discovery],
        waypoints: &'a [JourneyWaypoint],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for discovery in discoveries {
                self.save_discovery(discovery)
                    .await
                    .with_context(|| format!("failed to save discovery {}", discovery.id))?;
            }
            self.save_journey(journey)
                .await
                .with_context(|| format!("failed to save journey {}", journey.id))?;
            for waypoint in waypoints {
                self.save_waypoint(waypoint)
                    .await
                    .with_context(|| format!("failed to save waypoint {}", waypoint.id))?;
            }
            Ok(())
        })
    }

    fn get_journey<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Journey>>>;
    fn get_discovery<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Discovery>>>;
    fn get_waypoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<JourneyWaypoint>>>;

    fn list_journeys_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Vec<Journey>>>;
    fn list_discoveries_for_journey<'a>(
        &'a self,
        journey_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Discovery>>>;
    fn list_waypoints_for_journey<'a>(
        &'a self,
        journey_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<JourneyWaypoint>>>;

    /// Each delete reports whether a row existed.
    fn delete_journey<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>>;
    fn delete_discovery<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>>;
    fn delete_waypoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Turns every discovery of `journey_id` into a standalone one. Returns
    /// how many were detached.
    fn detach_discoveries<'a>(&'a self, journey_id: &'a str) -> BoxFuture<'a, Result<usize>>;
}
