use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc;

use crate::models::GeoPoint;

const LOCATION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Fix(GeoPoint),
    /// Signal lost or permission revoked. The stream may resume later.
    Unavailable(String),
}

/// Position feed. The engine subscribes when a session starts and unsubscribes
/// when it ends; gaps are just longer intervals between fixes.
///
/// A source is single-consumer: it serves one live subscription at a time and
/// may refuse another while one is open. The controller then reports
/// `LocationUnavailable` for the later session, which runs without a route.
/// A host walking several users at once should give each controller its own
/// source (one per device) or fan one feed out behind this trait.
pub trait LocationSource: Send + Sync {
    fn subscribe(&self) -> Result<mpsc::Receiver<LocationEvent>>;
    fn unsubscribe(&self);
}

/// Location source fed by the host platform through `push`. Single-consumer.
#[derive(Default)]
pub struct ChannelLocationSource {
    subscriber: Mutex<Option<mpsc::Sender<LocationEvent>>>,
}

impl ChannelLocationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when nobody is listening.
    pub fn push(&self, event: LocationEvent) -> bool {
        let sender = match self.subscriber.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return false,
        };
        match sender {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriber
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl LocationSource for ChannelLocationSource {
    fn subscribe(&self) -> Result<mpsc::Receiver<LocationEvent>> {
        let mut guard = self
            .subscriber
            .lock()
            .map_err(|_| anyhow!("location subscriber lock poisoned"))?;
        if guard.as_ref().is_some_and(|tx| !tx.is_closed()) {
            bail!("location updates already subscribed");
        }
        let (tx, rx) = mpsc::channel(LOCATION_CHANNEL_CAPACITY);
        *guard = Some(tx);
        Ok(rx)
    }

    fn unsubscribe(&self) {
        if let Ok(mut guard) = self.subscriber.lock() {
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn pushes_reach_the_subscriber() {
        let source = ChannelLocationSource::new();
        assert!(!source.push(LocationEvent::Unavailable("no fix".into())));

        let mut rx = source.subscribe().unwrap();
        let fix = GeoPoint::new(47.0, 8.0, Utc::now());
        assert!(source.push(LocationEvent::Fix(fix.clone())));
        assert_eq!(rx.recv().await, Some(LocationEvent::Fix(fix)));

        source.unsubscribe();
        assert!(!source.is_subscribed());
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn second_live_subscription_is_rejected() {
        let source = ChannelLocationSource::new();
        let _rx = source.subscribe().unwrap();
        assert!(source.subscribe().is_err());
    }
}
