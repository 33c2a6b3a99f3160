// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use log::debug;
use tarpc::tokio_serde::formats::Bincode;

use crate::core::DhtResult;
use crate::rpc::ChordServiceClient;

/// Dial a peer and spawn its client dispatch task. Callers (`ChordNode::get_connection`)
/// are responsible for caching the result; this always opens a fresh
/// connection.
pub async fn setup_client(addr: &str) -> DhtResult<ChordServiceClient> {
    debug!("dialing {}", addr);
    let transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default).await?;
    debug!("connected to {}", addr);
    Ok(ChordServiceClient::new(tarpc::client::Config::default(), transport).spawn())
}
