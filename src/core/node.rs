// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Routing core: node descriptors, the local/remote handle dispatcher,
//! the finger table, and the Chord routing algorithms.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::config::Config;
use crate::core::error::{DhtError, DhtResult};
use crate::core::key::{Key, KEY_BITS};
use crate::rpc::ChordServiceClient;

/// Immutable `{host, port, id}` triple identifying a node. Two
/// descriptors are equal iff their ids are equal.
#[derive(Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub host: String,
    pub port: u16,
    pub id: Key,
}

impl Descriptor {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let id = Key::hash_addr(&host, port);
        Descriptor { host, port, id }
    }

    fn same_address(&self, other: &Descriptor) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Descriptor {}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.id)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Augmented `find_predecessor` result: carries the predecessor's
/// successor alongside it so callers avoid a second RPC per hop.
#[derive(Debug, Clone)]
pub struct PredecessorLookup {
    pub node: Descriptor,
    pub succ: Descriptor,
}

/// Polymorphic reference to a node: either the owning node itself or a
/// `(host, port)`-addressed remote peer. Both variants only ever hold a
/// [`Descriptor`] — never a reference to the owning [`ChordNode`] — so
/// no ownership cycle can form through the finger table. Dispatch
/// always takes the calling node as context.
#[derive(Clone, Debug)]
pub enum NodeHandle {
    Local(Descriptor),
    Remote(Descriptor),
}

impl NodeHandle {
    /// Compares `descriptor` against the owning node's own address and
    /// returns the `Local` variant on a match. This aliasing is what
    /// keeps routing over a ring that includes `self` from looping
    /// through the network.
    pub fn resolve(descriptor: Descriptor, self_descriptor: &Descriptor) -> NodeHandle {
        if descriptor.same_address(self_descriptor) {
            NodeHandle::Local(descriptor)
        } else {
            NodeHandle::Remote(descriptor)
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        match self {
            NodeHandle::Local(d) | NodeHandle::Remote(d) => d,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, NodeHandle::Local(_))
    }

    pub async fn get_successor(&self, owner: &ChordNode) -> DhtResult<Descriptor> {
        match self {
            NodeHandle::Local(_) => Ok(owner.get_successor().await),
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                let wire = client
                    .get_successor(owner.rpc_context())
                    .await
                    .map_err(DhtError::from)?;
                Descriptor::try_from(wire)
            }
        }
    }

    pub async fn get_predecessor(&self, owner: &ChordNode) -> DhtResult<Option<Descriptor>> {
        match self {
            NodeHandle::Local(_) => Ok(owner.get_predecessor().await),
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                let wire = client
                    .get_predecessor(owner.rpc_context())
                    .await
                    .map_err(DhtError::from)?;
                wire.map(Descriptor::try_from).transpose()
            }
        }
    }

    pub async fn set_successor(&self, owner: &ChordNode, node: Descriptor) -> DhtResult<()> {
        match self {
            NodeHandle::Local(_) => {
                owner.set_successor(node).await;
                Ok(())
            }
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                client
                    .set_successor(owner.rpc_context(), node.into())
                    .await
                    .map_err(DhtError::from)?
                    .map_err(DhtError::from)
            }
        }
    }

    pub async fn set_predecessor(&self, owner: &ChordNode, node: Descriptor) -> DhtResult<()> {
        match self {
            NodeHandle::Local(_) => {
                owner.set_predecessor(node).await;
                Ok(())
            }
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                client
                    .set_predecessor(owner.rpc_context(), node.into())
                    .await
                    .map_err(DhtError::from)?
                    .map_err(DhtError::from)
            }
        }
    }

    pub async fn find_successor(&self, owner: &ChordNode, key: Key) -> DhtResult<Descriptor> {
        match self {
            NodeHandle::Local(_) => owner.find_successor(key).await,
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                let wire = client
                    .find_successor(owner.rpc_context(), key.to_hex())
                    .await
                    .map_err(DhtError::from)??;
                Descriptor::try_from(wire)
            }
        }
    }

    pub async fn find_predecessor(&self, owner: &ChordNode, key: Key) -> DhtResult<PredecessorLookup> {
        match self {
            NodeHandle::Local(_) => owner.find_predecessor(key).await,
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                let wire = client
                    .find_predecessor(owner.rpc_context(), key.to_hex())
                    .await
                    .map_err(DhtError::from)??;
                PredecessorLookup::try_from(wire)
            }
        }
    }

    pub async fn closest_preceding_finger(&self, owner: &ChordNode, key: Key) -> DhtResult<Descriptor> {
        match self {
            NodeHandle::Local(_) => owner.closest_preceding_finger(key).await,
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                let wire = client
                    .closest_preceding_finger(owner.rpc_context(), key.to_hex())
                    .await
                    .map_err(DhtError::from)??;
                Descriptor::try_from(wire)
            }
        }
    }

    pub async fn notify_new_predecessor(&self, owner: &ChordNode, node: Descriptor) -> DhtResult<()> {
        match self {
            NodeHandle::Local(_) => {
                owner.notify_new_predecessor(node).await;
                Ok(())
            }
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                client
                    .notify_new_predecessor(owner.rpc_context(), node.into())
                    .await
                    .map_err(DhtError::from)?
                    .map_err(DhtError::from)
            }
        }
    }

    /// Boxed because the remote arm can recurse back along a chain of
    /// predecessors and async fns can't recurse unboxed.
    pub fn update_finger_table<'a>(
        &'a self,
        owner: &'a ChordNode,
        node: Descriptor,
        i: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = DhtResult<()>> + Send + 'a>> {
        Box::pin(async move {
            match self {
                NodeHandle::Local(_) => owner.update_finger_table(node, i).await,
                NodeHandle::Remote(d) => {
                    let client = owner.get_connection(d).await?;
                    client
                        .update_finger_table(owner.rpc_context(), node.into(), i as u32)
                        .await
                        .map_err(DhtError::from)?
                        .map_err(DhtError::from)
                }
            }
        })
    }

    pub async fn lookup_with_succ(&self, owner: &ChordNode, key: Key) -> DhtResult<Descriptor> {
        match self {
            NodeHandle::Local(_) => owner.lookup_with_succ(key).await,
            NodeHandle::Remote(d) => {
                let client = owner.get_connection(d).await?;
                let wire = client
                    .lookup_with_succ(owner.rpc_context(), key.to_hex())
                    .await
                    .map_err(DhtError::from)??;
                Descriptor::try_from(wire)
            }
        }
    }
}

/// One `(start, responsible)` entry. Entry 0's `responsible` is the
/// node's successor — an alias, not a separate field.
#[derive(Clone)]
pub struct FingerEntry {
    pub start: Key,
    pub responsible: NodeHandle,
}

/// Exactly `M` finger entries, index `i` ↔ key offset `2^i`.
#[derive(Clone)]
pub struct FingerTable {
    entries: Vec<FingerEntry>,
}

impl FingerTable {
    pub fn new(self_id: Key, local: Descriptor) -> Self {
        let local_handle = NodeHandle::Local(local);
        let entries = (0..KEY_BITS)
            .map(|i| FingerEntry {
                start: self_id.wrapping_add_pow2(i as u32),
                responsible: local_handle.clone(),
            })
            .collect();
        FingerTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, i: usize) -> &FingerEntry {
        &self.entries[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut FingerEntry {
        &mut self.entries[i]
    }

    pub fn successor(&self) -> &NodeHandle {
        &self.entries[0].responsible
    }

    pub fn set_successor(&mut self, handle: NodeHandle) {
        self.entries[0].responsible = handle;
    }

    pub fn iter(&self) -> impl Iterator<Item = &FingerEntry> {
        self.entries.iter()
    }
}

/// A node's local routing state, guarded by a single per-node lock:
/// `predecessor`, `fingers`. Every public operation acquires it for its
/// snapshot/apply phases and releases it around outbound RPCs.
pub struct NodeState {
    pub descriptor: Descriptor,
    pub predecessor: Option<NodeHandle>,
    pub fingers: FingerTable,
}

/// A Chord participant: its own descriptor, its guarded routing state,
/// a cache of outbound RPC connections keyed by peer address, and the
/// config governing timeouts and the stabilizer.
pub struct ChordNode {
    descriptor: Descriptor,
    state: Mutex<NodeState>,
    clients: Mutex<HashMap<(String, u16), ChordServiceClient>>,
    config: Config,
    stopped: AtomicBool,
}

impl ChordNode {
    pub fn new(config: Config) -> Arc<ChordNode> {
        let descriptor = Descriptor::new(config.host.clone(), config.port);
        let fingers = FingerTable::new(descriptor.id, descriptor.clone());
        let state = NodeState {
            descriptor: descriptor.clone(),
            predecessor: None,
            fingers,
        };
        Arc::new(ChordNode {
            descriptor,
            state: Mutex::new(state),
            clients: Mutex::new(HashMap::new()),
            config,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn check_running(&self) -> DhtResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            Err(DhtError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Cooperative shutdown: flips a flag the stabilizer checks on its
    /// next wake and every public operation checks up front.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn rpc_context(&self) -> tarpc::context::Context {
        let mut ctx = tarpc::context::current();
        ctx.deadline = std::time::SystemTime::now() + self.config.rpc_timeout();
        ctx
    }

    pub(crate) async fn get_connection(&self, d: &Descriptor) -> DhtResult<ChordServiceClient> {
        let key = (d.host.clone(), d.port);
        let mut clients = self.clients.lock().await;
        if let Some(c) = clients.get(&key) {
            return Ok(c.clone());
        }
        debug!("Node {}: connecting to {}", self.descriptor, d);
        let addr = format!("{}:{}", d.host, d.port);
        let client = crate::client::setup_client(&addr)
            .await
            .map_err(|_| DhtError::Unreachable(d.clone()))?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    // ---- local operations backing the RPC surface ----

    pub async fn get_successor(&self) -> Descriptor {
        self.state.lock().await.fingers.successor().descriptor().clone()
    }

    pub async fn get_predecessor(&self) -> Option<Descriptor> {
        self.state
            .lock()
            .await
            .predecessor
            .as_ref()
            .map(|h| h.descriptor().clone())
    }

    pub async fn set_successor(&self, node: Descriptor) {
        let mut state = self.state.lock().await;
        let self_desc = state.descriptor.clone();
        state.fingers.set_successor(NodeHandle::resolve(node, &self_desc));
    }

    pub async fn set_predecessor(&self, node: Descriptor) {
        let mut state = self.state.lock().await;
        let self_desc = state.descriptor.clone();
        state.predecessor = Some(NodeHandle::resolve(node, &self_desc));
    }

    /// The only place that scans the finger table directly. The
    /// reverse scan is what finds the *closest* preceding finger.
    pub async fn closest_preceding_finger(&self, key: Key) -> DhtResult<Descriptor> {
        self.check_running()?;
        let state = self.state.lock().await;
        let self_id = state.descriptor.id;
        if key == self_id {
            // The precursor of self is self.predecessor, by definition.
            // Absent predecessor (freshly created, not yet notified)
            // falls back to self.
            return Ok(state
                .predecessor
                .as_ref()
                .map(|h| h.descriptor().clone())
                .unwrap_or_else(|| state.descriptor.clone()));
        }
        let succ_id = state.fingers.successor().descriptor().id;
        for i in (0..state.fingers.len()).rev() {
            let resp = state.fingers.get(i).responsible.descriptor();
            if resp.id == self_id {
                if succ_id == self_id {
                    return Ok(state.descriptor.clone()); // lone on the ring
                }
                if key.is_between_r_inclu(&self_id, &succ_id) {
                    return Ok(state.descriptor.clone());
                }
                continue;
            }
            if resp.id.is_between_exclu(&self_id, &key) {
                return Ok(resp.clone());
            }
        }
        Ok(state.descriptor.clone())
    }

    /// Walks finger tables backward from this node until the key's
    /// immediate predecessor on the ring is found.
    pub async fn find_predecessor(&self, key: Key) -> DhtResult<PredecessorLookup> {
        self.check_running()?;
        let (self_id, succ_handle) = {
            let state = self.state.lock().await;
            (state.descriptor.id, state.fingers.successor().clone())
        };
        if self_id == succ_handle.descriptor().id {
            return Ok(PredecessorLookup {
                node: self.descriptor.clone(),
                succ: self.descriptor.clone(),
            });
        }
        if key.is_between_r_inclu(&self_id, &succ_handle.descriptor().id) {
            return Ok(PredecessorLookup {
                node: self.descriptor.clone(),
                succ: succ_handle.descriptor().clone(),
            });
        }

        let mut n = self.closest_preceding_finger(key).await?;
        let mut n_handle = NodeHandle::resolve(n.clone(), &self.descriptor);
        let mut s = n_handle.get_successor(self).await?;

        let mut hops = 0usize;
        while !key.is_between_r_inclu(&n.id, &s.id) {
            if n.id == s.id {
                // n believes itself lone on the ring; a later
                // stabilization round will correct its view.
                break;
            }
            hops += 1;
            if hops > KEY_BITS {
                return Err(DhtError::ProtocolViolation(format!(
                    "find_predecessor made no progress after {} hops looking up {}",
                    hops, key
                )));
            }
            let next = n_handle.closest_preceding_finger(self, key).await?;
            n = next;
            n_handle = NodeHandle::resolve(n.clone(), &self.descriptor);
            s = n_handle.get_successor(self).await?;
        }
        Ok(PredecessorLookup { node: n, succ: s })
    }

    /// `find_successor(N.id) == N` falls out of this composition
    /// directly, no special-casing needed.
    pub async fn find_successor(&self, key: Key) -> DhtResult<Descriptor> {
        Ok(self.find_predecessor(key).await?.succ)
    }

    /// Successor-only lookup: cheaper than a full `find_predecessor`
    /// walk when the caller only needs the owning node for `key`, not
    /// the hop that precedes it.
    pub async fn lookup_with_succ(&self, key: Key) -> DhtResult<Descriptor> {
        self.check_running()?;
        let (self_id, succ_handle) = {
            let state = self.state.lock().await;
            (state.descriptor.id, state.fingers.successor().clone())
        };
        if key == self_id {
            return Ok(self.descriptor.clone());
        }
        if key.isbetween(&self_id, &succ_handle.descriptor().id) {
            return Ok(succ_handle.descriptor().clone());
        }
        succ_handle.lookup_with_succ(self, key).await
    }

    /// Remote-invoked: a peer believes it may be our predecessor.
    pub async fn notify_new_predecessor(&self, n: Descriptor) {
        let mut state = self.state.lock().await;
        let self_desc = state.descriptor.clone();
        let update = match &state.predecessor {
            None => true,
            Some(p) => n.id.is_between_exclu(&p.descriptor().id, &self_desc.id),
        };
        if update {
            debug!("Node {}: new predecessor {}", self_desc, n);
            state.predecessor = Some(NodeHandle::resolve(n, &self_desc));
        }
    }

    /// Periodic, local. Transport failures against the successor are
    /// treated as a no-op for this round.
    pub async fn stabilize(&self) -> DhtResult<()> {
        self.check_running()?;
        let (self_id, succ_handle) = {
            let state = self.state.lock().await;
            (state.descriptor.id, state.fingers.successor().clone())
        };

        let x = match succ_handle.get_predecessor(self).await {
            Ok(x) => x,
            Err(e) => {
                warn!(
                    "Node {}: stabilize could not reach successor {}: {}",
                    self.descriptor,
                    succ_handle.descriptor(),
                    e
                );
                None
            }
        };

        if let Some(x) = x {
            let mut state = self.state.lock().await;
            let self_desc = state.descriptor.clone();
            let succ_id = state.fingers.successor().descriptor().id;
            let accept = if self_id == succ_id {
                // Lone node: accept any non-self x as the new successor.
                x.id != self_id
            } else {
                x.id.is_between_exclu(&self_id, &succ_id)
            };
            if accept {
                state.fingers.set_successor(NodeHandle::resolve(x, &self_desc));
            }
        }

        let succ_now = {
            let state = self.state.lock().await;
            state.fingers.successor().clone()
        };
        if succ_now.descriptor().id != self_id {
            if let Err(e) = succ_now.notify_new_predecessor(self, self.descriptor.clone()).await {
                warn!(
                    "Node {}: failed to notify successor {}: {}",
                    self.descriptor,
                    succ_now.descriptor(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Repair one randomly-chosen finger per round.
    pub async fn fix_fingers(&self) -> DhtResult<()> {
        self.check_running()?;
        let i = {
            let mut rng = rand::thread_rng();
            rng.gen_range(1..KEY_BITS)
        };
        let start = {
            let state = self.state.lock().await;
            state.fingers.get(i).start
        };
        match self.find_successor(start).await {
            Ok(responsible) => {
                let mut state = self.state.lock().await;
                let self_desc = state.descriptor.clone();
                state.fingers.get_mut(i).responsible = NodeHandle::resolve(responsible, &self_desc);
            }
            Err(e) => warn!("Node {}: fix_fingers[{}] lookup failed: {}", self.descriptor, i, e),
        }
        Ok(())
    }

    /// Push-based finger repair invoked by `update_others` during join.
    /// Uses the half-open, self-inclusive/responsible-exclusive
    /// interval form.
    pub fn update_finger_table<'a>(
        &'a self,
        s: Descriptor,
        i: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = DhtResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.check_running()?;
            if s.id == self.descriptor.id {
                return Ok(());
            }
            let (resp_id, pred_handle) = {
                let state = self.state.lock().await;
                (
                    state.fingers.get(i).responsible.descriptor().id,
                    state.predecessor.clone(),
                )
            };
            if s.id.in_half_open(&self.descriptor.id, &resp_id) {
                {
                    let mut state = self.state.lock().await;
                    let self_desc = state.descriptor.clone();
                    state.fingers.get_mut(i).responsible = NodeHandle::resolve(s.clone(), &self_desc);
                }
                if let Some(pred) = pred_handle {
                    if pred.descriptor().id != s.id {
                        if let Err(e) = pred.update_finger_table(self, s, i).await {
                            warn!(
                                "Node {}: update_finger_table propagation to {} failed: {}",
                                self.descriptor,
                                pred.descriptor(),
                                e
                            );
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// `init_fingers` then `update_others`.
    pub async fn join(&self, existing: Descriptor) -> DhtResult<()> {
        self.check_running()?;
        self.init_fingers(existing).await?;
        self.update_others().await?;
        Ok(())
    }

    async fn init_fingers(&self, existing: Descriptor) -> DhtResult<()> {
        let self_desc = self.descriptor.clone();
        let existing_handle = NodeHandle::resolve(existing, &self_desc);

        let lookup = existing_handle.find_predecessor(self, self_desc.id).await?;

        let pred_handle = NodeHandle::resolve(lookup.node, &self_desc);
        let succ0_handle = NodeHandle::resolve(lookup.succ, &self_desc);

        {
            let mut state = self.state.lock().await;
            state.fingers.set_successor(succ0_handle.clone());
            state.predecessor = Some(pred_handle.clone());
        }

        // Eagerly rewire the immediate neighbors rather than waiting on
        // the stabilizer to pick up the change on its own.
        if let Err(e) = pred_handle.set_successor(self, self_desc.clone()).await {
            warn!("Node {}: failed to rewire predecessor {}: {}", self_desc, pred_handle.descriptor(), e);
        }
        if let Err(e) = succ0_handle.set_predecessor(self, self_desc.clone()).await {
            warn!("Node {}: failed to rewire successor {}: {}", self_desc, succ0_handle.descriptor(), e);
        }

        for i in 0..(KEY_BITS - 1) {
            let (start_next, start_i, resp_i) = {
                let state = self.state.lock().await;
                (
                    state.fingers.get(i + 1).start,
                    state.fingers.get(i).start,
                    state.fingers.get(i).responsible.clone(),
                )
            };
            if start_next.in_half_open(&start_i, &resp_i.descriptor().id) {
                let mut state = self.state.lock().await;
                state.fingers.get_mut(i + 1).responsible = resp_i;
            } else {
                let responsible = existing_handle.find_successor(self, start_next).await?;
                let handle = NodeHandle::resolve(responsible, &self_desc);
                let mut state = self.state.lock().await;
                state.fingers.get_mut(i + 1).responsible = handle;
            }
        }
        Ok(())
    }

    async fn update_others(&self) -> DhtResult<()> {
        let self_desc = self.descriptor.clone();
        for i in 0..KEY_BITS {
            let target = self_desc.id.wrapping_sub_pow2(i as u32);
            let lookup = match self.find_predecessor(target).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    warn!("Node {}: update_others[{}] predecessor lookup failed: {}", self_desc, i, e);
                    continue;
                }
            };
            let p_handle = NodeHandle::resolve(lookup.node, &self_desc);
            if let Err(e) = p_handle.update_finger_table(self, self_desc.clone(), i).await {
                warn!(
                    "Node {}: update_others[{}] failed against {}: {}",
                    self_desc,
                    i,
                    p_handle.descriptor(),
                    e
                );
            }
        }
        Ok(())
    }
}
