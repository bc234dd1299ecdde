//! Automatic geolocation when a tracked device reports a new Wi-Fi scan.

use std::sync::Arc;

use futures::FutureExt;

use crate::{
    dispatch::Dispatcher,
    events::{EventBus, StateChange, SubscriptionId},
    fingerprint::Fingerprint,
};

/// Accepts changes of devices under `tracker_prefix` whose new attributes
/// carry `wifi_access_points`.
pub fn is_tracked_scan(change: &StateChange, tracker_prefix: &str) -> bool {
    change.entity_id.starts_with(tracker_prefix)
        && change
            .new_state
            .as_ref()
            .is_some_and(|x| x.wifi_access_points.is_some())
}

/// Compares the BSSID sets of the previous and new scan only. A change with
/// no previous scan always counts as changed.
pub fn access_points_changed(change: &StateChange) -> bool {
    let Some(old) = change
        .old_state
        .as_ref()
        .and_then(|x| x.wifi_access_points.as_deref())
    else {
        return true;
    };
    let new = change
        .new_state
        .as_ref()
        .and_then(|x| x.wifi_access_points.as_deref())
        .unwrap_or_default();

    Fingerprint::from_access_points(old) != Fingerprint::from_access_points(new)
}

/// Subscribes the dispatcher to `bus`. Failures are logged, not returned,
/// since nobody is waiting on an automatic dispatch.
pub fn register(
    bus: &EventBus,
    dispatcher: Arc<Dispatcher>,
    tracker_prefix: impl Into<String>,
) -> SubscriptionId {
    let tracker_prefix = tracker_prefix.into();
    bus.subscribe(
        Box::new(move |change: &StateChange| is_tracked_scan(change, &tracker_prefix)),
        Box::new(move |change: StateChange| {
            let dispatcher = dispatcher.clone();
            async move {
                if !access_points_changed(&change) {
                    return;
                }
                let device_id = change.entity_id;
                tracing::info!(%device_id, "auto-triggering geolocation, wifi_access_points changed");
                if let Err(e) = dispatcher.geolocate(&device_id, false).await {
                    tracing::error!(%device_id, error = %e, "automatic geolocation failed");
                }
            }
            .boxed()
        }),
    )
}
