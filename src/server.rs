// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use futures::{future, StreamExt};
use log::{debug, info, warn};
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Bincode;

use crate::core::error::*;
use crate::core::node::{ChordNode, Descriptor, PredecessorLookup};
use crate::rpc::{ChordService, WireDescriptor, WireError, WireKey, WirePredecessorLookup};

/// Thin adapter from the wire service trait onto [`ChordNode`]'s local
/// operations. Cloning is cheap: it only clones the `Arc`.
#[derive(Clone)]
pub struct ChordServer {
    node: Arc<ChordNode>,
}

impl ChordServer {
    pub fn new(node: Arc<ChordNode>) -> Self {
        ChordServer { node }
    }
}

#[tarpc::server]
impl ChordService for ChordServer {
    async fn get_successor(self, _: tarpc::context::Context) -> WireDescriptor {
        self.node.get_successor().await.into()
    }

    async fn get_predecessor(self, _: tarpc::context::Context) -> Option<WireDescriptor> {
        self.node.get_predecessor().await.map(Into::into)
    }

    async fn set_successor(self, _: tarpc::context::Context, node: WireDescriptor) -> Result<(), WireError> {
        let node = Descriptor::try_from(node).map_err(WireError::from)?;
        self.node.set_successor(node).await;
        Ok(())
    }

    async fn set_predecessor(self, _: tarpc::context::Context, node: WireDescriptor) -> Result<(), WireError> {
        let node = Descriptor::try_from(node).map_err(WireError::from)?;
        self.node.set_predecessor(node).await;
        Ok(())
    }

    async fn find_successor(self, _: tarpc::context::Context, key: WireKey) -> Result<WireDescriptor, WireError> {
        let key = crate::core::key::Key::from_hex(&key).map_err(WireError::from)?;
        debug!("Node {}: find_successor_rpc({})", self.node.descriptor(), key);
        let succ = self.node.find_successor(key).await.map_err(WireError::from)?;
        Ok(succ.into())
    }

    async fn find_predecessor(
        self,
        _: tarpc::context::Context,
        key: WireKey,
    ) -> Result<WirePredecessorLookup, WireError> {
        let key = crate::core::key::Key::from_hex(&key).map_err(WireError::from)?;
        let lookup: PredecessorLookup = self.node.find_predecessor(key).await.map_err(WireError::from)?;
        Ok(lookup.into())
    }

    async fn closest_preceding_finger(
        self,
        _: tarpc::context::Context,
        key: WireKey,
    ) -> Result<WireDescriptor, WireError> {
        let key = crate::core::key::Key::from_hex(&key).map_err(WireError::from)?;
        let n = self.node.closest_preceding_finger(key).await.map_err(WireError::from)?;
        Ok(n.into())
    }

    async fn notify_new_predecessor(
        self,
        _: tarpc::context::Context,
        node: WireDescriptor,
    ) -> Result<(), WireError> {
        let node = Descriptor::try_from(node).map_err(WireError::from)?;
        debug!("Node {}: notify_rpc({})", self.node.descriptor(), node);
        self.node.notify_new_predecessor(node).await;
        Ok(())
    }

    async fn update_finger_table(
        self,
        _: tarpc::context::Context,
        node: WireDescriptor,
        i: u32,
    ) -> Result<(), WireError> {
        let node = Descriptor::try_from(node).map_err(WireError::from)?;
        self.node.update_finger_table(node, i as usize).await.map_err(WireError::from)
    }

    async fn lookup_with_succ(self, _: tarpc::context::Context, key: WireKey) -> Result<WireDescriptor, WireError> {
        let key = crate::core::key::Key::from_hex(&key).map_err(WireError::from)?;
        let n = self.node.lookup_with_succ(key).await.map_err(WireError::from)?;
        Ok(n.into())
    }
}

/// Owns the spawned listener task and (when the stabilizer is enabled)
/// its background loop. A single watch channel gates both tasks
/// cooperatively.
pub struct ServerManager {
    handle: future::JoinAll<tokio::task::JoinHandle<()>>,
    tx: tokio::sync::watch::Sender<bool>,
}

impl ServerManager {
    pub fn new(handles: Vec<tokio::task::JoinHandle<()>>, tx: tokio::sync::watch::Sender<bool>) -> Self {
        ServerManager {
            handle: future::join_all(handles),
            tx,
        }
    }

    /// Wait for every background task to terminate.
    pub async fn wait(self) -> DhtResult<()> {
        self.handle
            .await
            .into_iter()
            .collect::<Result<Vec<_>, tokio::task::JoinError>>()
            .map_err(|e| DhtError::ProtocolViolation(e.to_string()))?;
        Ok(())
    }

    /// Signal every background task to stop and wait for them to exit.
    pub async fn stop(self) -> DhtResult<()> {
        let _ = self.tx.send(true);
        self.wait().await
    }
}

/// Bind `addr` and serve [`ChordService`] over it until `stop_rx` fires,
/// dispatching each accepted connection on its own task.
pub async fn serve(
    node: Arc<ChordNode>,
    addr: &str,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
    ready_tx: tokio::sync::oneshot::Sender<()>,
) -> DhtResult<()> {
    let mut listener = tarpc::serde_transport::tcp::listen(addr, Bincode::default).await?;
    listener.config_mut().max_frame_length(usize::MAX);
    info!("Node {}: listening on {}", node.descriptor(), addr);
    let _ = ready_tx.send(());

    let server = ChordServer::new(node);
    let mut incoming = listener
        .filter_map(|r| future::ready(r.ok()))
        .map(BaseChannel::with_defaults)
        .map(|channel| {
            let server = server.clone();
            channel.execute(server.serve()).for_each(|f| async move {
                tokio::spawn(f);
            })
        })
        .buffer_unordered(16);

    loop {
        tokio::select! {
            _ = incoming.next() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
    warn!("Node {}: server loop stopped", server.node.descriptor());
    Ok(())
}
