//! Watch loops spawned by a connection.
//!
//! - [`shared::SharedWatch`]: forwards a region's multicast channel
//! - [`entity::EntityWatch`]: dedicated long-poll of one service or node
//!
//! Both exit when their registration token is cancelled (unwatch, teardown or
//! shutdown) or when the outbound queue is closed, and remove their own
//! registration from the watch set on the way out.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub mod entity;
pub mod shared;

pub use entity::{EntityKind, EntityWatch};
pub use shared::SharedWatch;

/// Sleep for `duration` unless `token` fires first. Returns `false` on cancel.
pub(crate) async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
