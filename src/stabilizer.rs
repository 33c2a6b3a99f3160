// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic background maintenance: `stabilize` every tick, then
//! `fix_fingers`. A single task drives both, gated by the same
//! `watch::<bool>` the RPC listener shuts down on.

use std::sync::Arc;

use log::{debug, warn};
use tokio::time::interval;

use crate::core::node::ChordNode;

/// Runs until `stop_rx` observes `true`. Errors from a single round
/// (e.g. `Stopped` raised mid-shutdown) are logged and do not abort the
/// loop; the loop's own exit condition is the stop signal.
pub async fn run(node: Arc<ChordNode>, mut stop_rx: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = interval(node.config().stabilize_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = node.stabilize().await {
                    warn!("Node {}: stabilize round failed: {}", node.descriptor(), e);
                }
                if let Err(e) = node.fix_fingers().await {
                    warn!("Node {}: fix_fingers round failed: {}", node.descriptor(), e);
                }
                debug!("Node {}: stabilizer tick complete", node.descriptor());
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Node {}: stabilizer stopped", node.descriptor());
}
