// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

use crate::core::node::Descriptor;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("node {0} unreachable")]
    Unreachable(Descriptor),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol invariant violated: {0}")]
    ProtocolViolation(String),

    #[error("operation attempted on a stopped node")]
    Stopped,

    #[error("rpc error")]
    Rpc(#[from] tarpc::client::RpcError),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

pub type DhtResult<T> = Result<T, DhtError>;
