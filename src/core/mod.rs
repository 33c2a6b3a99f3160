// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod config;
pub mod error;
pub mod key;
pub mod node;

pub use config::Config;
pub use error::{DhtError, DhtResult};
pub use key::{Key, KEY_BITS, KEY_BYTES};
pub use node::{ChordNode, Descriptor, FingerEntry, FingerTable, NodeHandle, NodeState, PredecessorLookup};
