//! Network manager (component E). Registry/driver-dispatch shape follows
//! the original `network/network.go`, rewritten to avoid its
//! module-level-singleton maps (`drivers`, `networks`) per SPEC_FULL.md §9
//! — state here is owned by `NetworkManager`, constructed fresh per
//! invocation, not a process-wide global.

use std::fs;
use std::net::Ipv4Addr;

use anyhow::Context;
use nix::fcntl::{open, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Paths;
use crate::error::Error;
use crate::network::bridge::{self, BridgeDriver};
use crate::network::ipam::{Cidr, Ipam};
use crate::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(rename = "ipRange")]
    pub ip_range: String,
    pub driver: String,
}

#[derive(Clone, Debug)]
pub struct Endpoint {
    pub id: String,
    pub host_side: String,
    pub peer_side: String,
    pub ip: Ipv4Addr,
    pub port_mapping: Vec<String>,
}

pub struct NetworkManager {
    paths: Paths,
    ipam: Ipam,
}

impl NetworkManager {
    pub fn new(paths: Paths) -> Self {
        let ipam = Ipam::new(paths.ipam_file());
        Self { paths, ipam }
    }

    pub fn list(&self) -> Result<Vec<Network>> {
        let dir = self.paths.network_dir();
        let mut networks = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(networks),
            Err(err) => return Err(err).context("reading network dir"),
        };
        for entry in entries {
            let entry = entry?;
            let data = fs::read(entry.path())?;
            networks.push(serde_json::from_slice(&data)?);
        }
        Ok(networks)
    }

    pub fn load(&self, name: &str) -> Result<Network> {
        let data = fs::read(self.paths.network_file(name))
            .map_err(|_| Error::NoSuchNetwork(name.to_string()))?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn save(&self, network: &Network) -> Result<()> {
        if let Some(parent) = self.paths.network_file(&network.name).parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(network)?;
        fs::write(self.paths.network_file(&network.name), data)?;
        Ok(())
    }

    pub fn create(&self, driver: &str, subnet: &str, name: &str) -> Result<()> {
        let cidr = Cidr::parse(subnet)?;
        let gateway = self.ipam.allocate(&cidr)?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        rt.block_on(async {
            let (conn, handle, _) = rtnetlink::new_connection()?;
            tokio::task::spawn(conn);
            BridgeDriver::create(&handle, name, &cidr, gateway).await
        })?;
        self.save(&Network {
            name: name.to_string(),
            ip_range: cidr.to_string(),
            driver: driver.to_string(),
        })
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let network = self.load(name)?;
        let cidr = Cidr::parse(&network.ip_range)?;
        let gateway = Ipv4Addr::from(u32::from(cidr.base) + 1);
        self.ipam.release(&cidr, gateway)?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        rt.block_on(async {
            let (conn, handle, _) = rtnetlink::new_connection()?;
            tokio::task::spawn(conn);
            BridgeDriver::delete(&handle, name).await
        })?;
        fs::remove_file(self.paths.network_file(name))?;
        Ok(())
    }

    /// Connect a container to `network_name`: allocate an IP, create the
    /// veth pair, move the peer end into the container's netns, and
    /// configure address/routes/DNAT there. See SPEC_FULL.md §4.E steps
    /// 4-6 for the pinned-thread critical section this implements.
    pub fn connect(
        &self,
        network_name: &str,
        container_id: &str,
        pid: i32,
        port_mapping: &[String],
    ) -> Result<Endpoint> {
        let network = self.load(network_name)?;
        let cidr = Cidr::parse(&network.ip_range)?;
        let ip = self.ipam.allocate(&cidr)?;
        let endpoint_id = format!("{container_id}-{network_name}");

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let bridge_name = network.name.clone();
        let (host_side, peer_side) = rt.block_on(async {
            let (conn, handle, _) = rtnetlink::new_connection()?;
            tokio::task::spawn(conn);
            BridgeDriver::connect(&handle, &endpoint_id, &bridge_name).await
        })?;

        move_into_netns_and_configure(&peer_side, pid, ip, cidr.prefix, cidr.base)?;

        for mapping in port_mapping {
            if let Some((host_port, container_port)) = mapping.split_once(':') {
                setup_dnat(host_port, container_port, ip)?;
            }
        }

        Ok(Endpoint {
            id: endpoint_id,
            host_side,
            peer_side,
            ip,
            port_mapping: port_mapping.to_vec(),
        })
    }
}

/// The pinned critical section of SPEC_FULL.md §4.E: move `peer` into
/// `pid`'s net namespace, then assign its address, bring up lo/peer, and
/// add the default route — all on one dedicated OS thread that starts and
/// ends back in the host netns, so no other code ever observes the switch.
fn move_into_netns_and_configure(
    peer: &str,
    pid: i32,
    ip: Ipv4Addr,
    prefix: u8,
    gateway: Ipv4Addr,
) -> Result<()> {
    let peer = peer.to_string();
    std::thread::Builder::new()
        .name("netns-config".into())
        .spawn(move || -> Result<()> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()?;
            rt.block_on(async move {
                let (conn, handle, _) = rtnetlink::new_connection()?;
                tokio::task::spawn(conn);
                let peer_index = bridge::link_index(&handle, &peer)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("peer link {peer} not found"))?;

                let move_target = open(
                    format!("/proc/{pid}/ns/net").as_str(),
                    OFlag::O_RDONLY,
                    Mode::empty(),
                )
                .context("opening target netns")?;
                handle
                    .link()
                    .set(peer_index)
                    .setns_by_fd(move_target)
                    .execute()
                    .await
                    .context("moving peer into container netns")?;
                nix::unistd::close(move_target).ok();

                let host_ns = open("/proc/self/ns/net", OFlag::O_RDONLY, Mode::empty())
                    .context("opening host netns")?;
                let container_ns = open(
                    format!("/proc/{pid}/ns/net").as_str(),
                    OFlag::O_RDONLY,
                    Mode::empty(),
                )
                .context("opening container netns")?;

                setns(container_ns, CloneFlags::CLONE_NEWNET)
                    .context("entering container netns")?;
                let result = configure_container_side(&peer, ip, prefix, gateway).await;
                setns(host_ns, CloneFlags::CLONE_NEWNET).context("restoring host netns")?;

                nix::unistd::close(host_ns).ok();
                nix::unistd::close(container_ns).ok();
                result
            })
        })?
        .join()
        .map_err(|_| anyhow::anyhow!("netns configuration thread panicked"))?
}

async fn configure_container_side(
    peer: &str,
    ip: Ipv4Addr,
    prefix: u8,
    gateway: Ipv4Addr,
) -> Result<()> {
    let (conn, handle, _) = rtnetlink::new_connection()?;
    tokio::task::spawn(conn);

    let peer_index = bridge::link_index(&handle, peer)
        .await?
        .ok_or_else(|| anyhow::anyhow!("peer link {peer} not found in container netns"))?;
    handle
        .address()
        .add(peer_index, ip.into(), prefix)
        .execute()
        .await
        .context("assigning container address")?;
    handle
        .link()
        .set(peer_index)
        .up()
        .execute()
        .await
        .context("bringing up peer link")?;

    if let Some(lo_index) = bridge::link_index(&handle, "lo").await? {
        handle
            .link()
            .set(lo_index)
            .up()
            .execute()
            .await
            .context("bringing up loopback")?;
    }

    handle
        .route()
        .add()
        .v4()
        .gateway(gateway)
        .execute()
        .await
        .context("adding default route")?;
    Ok(())
}

fn setup_dnat(host_port: &str, container_port: &str, ip: Ipv4Addr) -> Result<()> {
    let dest = format!("{ip}:{container_port}");
    let status = std::process::Command::new("iptables")
        .args([
            "-t", "nat", "-A", "PREROUTING", "-p", "tcp", "-m", "tcp", "--dport", host_port, "-j",
            "DNAT", "--to-destination", &dest,
        ])
        .status()
        .context("running iptables for DNAT rule")?;
    if !status.success() {
        debug!(host_port, %dest, "iptables DNAT rule exited non-zero");
    }
    Ok(())
}
