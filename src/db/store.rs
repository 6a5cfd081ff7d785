use anyhow::Result;

use crate::{
    identification::BoxFuture,
    models::{Discovery, Journey, JourneyWaypoint},
    persistence::JourneyStore,
};

use super::connection::Database;

impl JourneyStore for Database {
    fn save_journey<'a>(&'a self, journey: &'a Journey) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.upsert_journey(journey))
    }

    fn save_discovery<'a>(&'a self, discovery: &'a Discovery) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.upsert_discovery(discovery))
    }

    fn save_waypoint<'a>(&'a self, waypoint: &'a JourneyWaypoint) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.upsert_waypoint(waypoint))
    }

    fn finish_journey<'a>(
        &'a self,
        journey: &'a Journey,
        discoveries: &'a [Discovery],
        waypoints: &'a [JourneyWaypoint],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(Database::finish_journey(self, journey, discoveries, waypoints))
    }

    fn get_journey<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Journey>>> {
        Box::pin(Database::get_journey(self, id))
    }

    fn get_discovery<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Discovery>>> {
        Box::pin(Database::get_discovery(self, id))
    }

    fn get_waypoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<JourneyWaypoint>>> {
        Box::pin(Database::get_waypoint(self, id))
    }

    fn list_journeys_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Vec<Journey>>> {
        Box::pin(Database::list_journeys_by_user(self, user_id))
    }

    fn list_discoveries_for_journey<'a>(
        &'a self,
        journey_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Discovery>>> {
        Box::pin(Database::list_discoveries_for_journey(self, journey_id))
    }

    fn list_waypoints_for_journey<'a>(
        &'a self,
        journey_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<JourneyWaypoint>>> {
        Box::pin(Database::list_waypoints_for_journey(self, journey_id))
    }

    fn delete_journey<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(Database::delete_journey(self, id))
    }

    fn delete_discovery<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(Database::delete_discovery(self, id))
    }

    fn delete_waypoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(Database::delete_waypoint(self, id))
    }

    fn detach_discoveries<'a>(&'a self, journey_id: &'a str) -> BoxFuture<'a, Result<usize>> {
        Box::pin(Database::detach_discoveries(self, journey_id))
    }
}
