// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The "Figure 3(b)" topology from the Chord paper: three nodes joining
//! in sequence over a 256-bit keyspace. Reads go over real `tarpc`
//! clients (exercising the wire path end to end); stabilization is
//! still driven in-process since it is local maintenance, not part of
//! the RPC surface (see `rpc::ChordService`).

use chord_rust::client::setup_client;
use chord_rust::core::Config;
use chord_rust::rpc::ChordService;
use chord_rust::ChordHandle;
use tarpc::context;

async fn start(port: u16, join: Option<String>) -> ChordHandle {
    let config = Config {
        host: "localhost".to_string(),
        port,
        join,
        stabilize_interval_secs: 3600,
        stabilizer_enabled: false,
        rpc_timeout_multiplier: 2,
    };
    ChordHandle::start(config).await.expect("node should start")
}

#[tokio::test]
async fn test_figure_3b() -> anyhow::Result<()> {
    let n0 = start(19800, None).await;
    let c0 = setup_client("localhost:19800").await?;
    let id0 = n0.node().descriptor().id.to_hex();

    // single-node ring
    let self0 = c0.get_successor(context::current()).await?;
    assert_eq!(self0.id, id0);
    assert!(c0.get_predecessor(context::current()).await?.is_none());

    // node 1 joins node 0
    let n1 = start(19801, Some("localhost:19800".to_string())).await;
    let c1 = setup_client("localhost:19801").await?;
    let id1 = n1.node().descriptor().id.to_hex();
    let succ1 = c1.get_successor(context::current()).await?;
    assert_eq!(succ1.id, id0);

    // stabilize n1 first so it notifies n0
    n1.node().stabilize().await?;
    let pred0 = c0.get_predecessor(context::current()).await?.unwrap();
    assert_eq!(pred0.id, id1);

    n0.node().stabilize().await?;
    let succ0 = c0.get_successor(context::current()).await?;
    assert_eq!(succ0.id, id1);
    let pred1 = c1.get_predecessor(context::current()).await?.unwrap();
    assert_eq!(pred1.id, id0);

    // node 2 joins node 1
    let n2 = start(19802, Some("localhost:19801".to_string())).await;
    let c2 = setup_client("localhost:19802").await?;
    n0.node().stabilize().await?;
    n1.node().stabilize().await?;
    n2.node().stabilize().await?;
    n0.node().stabilize().await?;
    n1.node().stabilize().await?;
    n2.node().stabilize().await?;

    // ring closure: three hops via successor return to n0
    let mut cur = c0.get_successor(context::current()).await?;
    for _ in 0..2 {
        let client = if cur.id == id1 { &c1 } else { &c2 };
        cur = client.get_successor(context::current()).await?;
    }
    assert_eq!(cur.id, id0);

    n0.stop().await?;
    n1.stop().await?;
    n2.stop().await?;
    Ok(())
}
