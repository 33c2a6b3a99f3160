// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod client;
pub mod core;
pub mod rpc;
pub mod server;
pub mod stabilizer;

pub use crate::core::{ChordNode, Config, Descriptor, DhtError, DhtResult, Key};

use std::sync::Arc;

use log::info;

use crate::server::ServerManager;

/// Brings a node fully up: binds the RPC listener, optionally joins an
/// existing ring, and (unless disabled) starts the stabilizer. This is
/// the crate's single entry point.
pub struct ChordHandle {
    node: Arc<ChordNode>,
    manager: ServerManager,
}

impl ChordHandle {
    pub async fn start(config: Config) -> DhtResult<ChordHandle> {
        let node = ChordNode::new(config.clone());
        let addr = format!("{}:{}", node.descriptor().host, node.descriptor().port);
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        let serve_node = node.clone();
        let serve_rx = stop_rx.clone();
        let server_handle = tokio::spawn(async move {
            if let Err(e) = crate::server::serve(serve_node, &addr, serve_rx, ready_tx).await {
                log::error!("server task exited with error: {}", e);
            }
        });
        let _ = ready_rx.await;

        if let Some(existing) = &config.join {
            let (host, port) = split_addr(existing)?;
            let existing_desc = Descriptor::new(host, port);
            node.join(existing_desc).await?;
            info!("Node {}: joined via {}", node.descriptor(), existing);
        }

        let mut handles = vec![server_handle];
        if config.stabilizer_enabled {
            let stab_node = node.clone();
            let stab_rx = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                crate::stabilizer::run(stab_node, stab_rx).await;
            }));
        }

        Ok(ChordHandle {
            node,
            manager: ServerManager::new(handles, stop_tx),
        })
    }

    pub fn node(&self) -> &Arc<ChordNode> {
        &self.node
    }

    /// Signal the listener and stabilizer to exit and wait for them to
    /// finish the round they're in.
    pub async fn stop(self) -> DhtResult<()> {
        self.node.stop();
        self.manager.stop().await
    }
}

fn split_addr(addr: &str) -> DhtResult<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| DhtError::InvalidArgument(format!("expected host:port, got {}", addr)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DhtError::InvalidArgument(format!("invalid port in {}", addr)))?;
    Ok((host.to_string(), port))
}
