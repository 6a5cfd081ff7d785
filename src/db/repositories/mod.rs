mod discoveries;
mod journeys;
mod waypoints;

pub use journeys::JourneyPage;
