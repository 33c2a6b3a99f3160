// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything the core needs to bring up a node, independent of how
/// it was obtained (CLI flags, a config file, or built programmatically
/// by a test).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `host:port` of an existing ring member to join, if any.
    pub join: Option<String>,
    pub stabilize_interval_secs: u64,
    pub stabilizer_enabled: bool,
    /// Remote calls are bounded by `rpc_timeout_multiplier * stabilize_interval`.
    pub rpc_timeout_multiplier: u32,
}

impl Config {
    pub fn stabilize_interval(&self) -> Duration {
        Duration::from_secs(self.stabilize_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.stabilize_interval() * self.rpc_timeout_multiplier
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            join: None,
            stabilize_interval_secs: 1,
            stabilizer_enabled: true,
            rpc_timeout_multiplier: 2,
        }
    }
}
