//! Bridge driver (component D). Netlink calls follow the pattern in
//! `examples/orbstack-swift-nio/vinit/src/main.rs`'s `setup_network`
//! (`rtnetlink::new_connection`, `handle.link()`/`handle.address()`,
//! `.execute().await`); the veth-naming and masquerade-rule shape follow
//! the original `network/bridge.go`.

use std::net::Ipv4Addr;
use std::process::Command;

use anyhow::Context;
use futures::TryStreamExt;
use rtnetlink::Handle;
use tracing::debug;

use crate::network::ipam::Cidr;
use crate::Result;

pub struct BridgeDriver;

impl BridgeDriver {
    /// Create the bridge if it doesn't exist, assign the gateway address,
    /// bring it up, and install the MASQUERADE rule for `subnet`.
    pub async fn create(handle: &Handle, name: &str, subnet: &Cidr, gateway: Ipv4Addr) -> Result<()> {
        if link_index(handle, name).await?.is_none() {
            handle
                .link()
                .add()
                .bridge(name.to_string())
                .execute()
                .await
                .with_context(|| format!("creating bridge {name}"))?;
        }
        let index = link_index(handle, name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("bridge {name} missing after creation"))?;
        handle
            .address()
            .add(index, gateway.into(), subnet.prefix)
            .execute()
            .await
            .or_else(|err| {
                // idempotent: address already present on re-create
                debug!("bridge address add on {name}: {err}");
                Ok::<_, rtnetlink::Error>(())
            })?;
        handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .with_context(|| format!("bringing up bridge {name}"))?;

        setup_masquerade(&subnet.to_string(), name)?;
        Ok(())
    }

    /// Remove the bridge device. Masquerade rule cleanup is best-effort
    /// (known limitation, see SPEC_FULL.md §9).
    pub async fn delete(handle: &Handle, name: &str) -> Result<()> {
        if let Some(index) = link_index(handle, name).await? {
            handle
                .link()
                .del(index)
                .execute()
                .await
                .with_context(|| format!("deleting bridge {name}"))?;
        }
        Ok(())
    }

    /// Create a veth pair `<id[:5]>` / `cif-<id[:5]>`, attach the host-side
    /// end to the bridge, bring it up. Returns the (host-side, peer) names.
    pub async fn connect(handle: &Handle, endpoint_id: &str, bridge: &str) -> Result<(String, String)> {
        let short = &endpoint_id[..endpoint_id.len().min(5)];
        let host_side = short.to_string();
        let peer_side = format!("cif-{short}");

        handle
            .link()
            .add()
            .veth(host_side.clone(), peer_side.clone())
            .execute()
            .await
            .with_context(|| format!("creating veth pair {host_side}/{peer_side}"))?;

        let bridge_index = link_index(handle, bridge)
            .await?
            .ok_or_else(|| anyhow::anyhow!("bridge {bridge} does not exist"))?;
        let host_index = link_index(handle, &host_side)
            .await?
            .ok_or_else(|| anyhow::anyhow!("veth {host_side} missing after creation"))?;

        handle
            .link()
            .set(host_index)
            .master(bridge_index)
            .up()
            .execute()
            .await
            .with_context(|| format!("attaching {host_side} to bridge {bridge}"))?;

        Ok((host_side, peer_side))
    }

    /// No-op: endpoint teardown happens implicitly when the container's
    /// netns (and therefore its peer veth end) is destroyed.
    pub fn disconnect() {}
}

pub(crate) async fn link_index(handle: &Handle, name: &str) -> Result<Option<u32>> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(msg)) => Ok(Some(msg.header.index)),
        Ok(None) => Ok(None),
        Err(rtnetlink::Error::NetlinkError(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn setup_masquerade(subnet: &str, bridge: &str) -> Result<()> {
    let status = Command::new("iptables")
        .args(["-t", "nat", "-A", "POSTROUTING", "-s", subnet, "!", "-o", bridge, "-j", "MASQUERADE"])
        .status()
        .context("running iptables for masquerade rule")?;
    if !status.success() {
        tracing::warn!(subnet, bridge, "iptables masquerade rule exited non-zero");
    }
    Ok(())
}
