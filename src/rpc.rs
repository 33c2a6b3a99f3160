// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire-level RPC surface: a tarpc service exposing every operation a
//! remote [`NodeHandle::Remote`] needs to dispatch, plus the
//! serializable projections of core types that cross it.

use serde::{Deserialize, Serialize};

use crate::core::error::DhtError;
use crate::core::key::Key;
use crate::core::node::{Descriptor, PredecessorLookup};

pub type WireKey = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDescriptor {
    pub host: String,
    pub port: u16,
    pub id: WireKey,
}

impl From<Descriptor> for WireDescriptor {
    fn from(d: Descriptor) -> Self {
        WireDescriptor {
            host: d.host,
            port: d.port,
            id: d.id.to_hex(),
        }
    }
}

impl TryFrom<WireDescriptor> for Descriptor {
    type Error = DhtError;

    fn try_from(w: WireDescriptor) -> Result<Self, DhtError> {
        Ok(Descriptor {
            host: w.host,
            port: w.port,
            id: Key::from_hex(&w.id)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePredecessorLookup {
    pub node: WireDescriptor,
    pub succ: WireDescriptor,
}

impl From<PredecessorLookup> for WirePredecessorLookup {
    fn from(p: PredecessorLookup) -> Self {
        WirePredecessorLookup {
            node: p.node.into(),
            succ: p.succ.into(),
        }
    }
}

impl TryFrom<WirePredecessorLookup> for PredecessorLookup {
    type Error = DhtError;

    fn try_from(w: WirePredecessorLookup) -> Result<Self, DhtError> {
        Ok(PredecessorLookup {
            node: w.node.try_into()?,
            succ: w.succ.try_into()?,
        })
    }
}

/// Lossy, serializable projection of [`DhtError`] for crossing the
/// wire: tarpc requires error types to be `Serialize`, which
/// `DhtError` (carrying a `tarpc::client::RpcError`) cannot be.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{0}")]
pub struct WireError(pub String);

impl From<DhtError> for WireError {
    fn from(e: DhtError) -> Self {
        WireError(e.to_string())
    }
}

impl From<WireError> for DhtError {
    fn from(e: WireError) -> Self {
        DhtError::InvalidArgument(e.0)
    }
}

#[tarpc::service]
pub trait ChordService {
    async fn get_successor() -> WireDescriptor;
    async fn get_predecessor() -> Option<WireDescriptor>;
    /// Used during join to eagerly rewire a neighbor ahead of the next
    /// stabilize round.
    async fn set_successor(node: WireDescriptor) -> Result<(), WireError>;
    async fn set_predecessor(node: WireDescriptor) -> Result<(), WireError>;
    async fn find_successor(key: WireKey) -> Result<WireDescriptor, WireError>;
    async fn find_predecessor(key: WireKey) -> Result<WirePredecessorLookup, WireError>;
    async fn closest_preceding_finger(key: WireKey) -> Result<WireDescriptor, WireError>;
    async fn notify_new_predecessor(node: WireDescriptor) -> Result<(), WireError>;
    async fn update_finger_table(node: WireDescriptor, i: u32) -> Result<(), WireError>;
    /// Successor-only lookup: a read-only shortcut over state this
    /// core already maintains.
    async fn lookup_with_succ(key: WireKey) -> Result<WireDescriptor, WireError>;
}
