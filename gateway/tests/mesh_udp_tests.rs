//! Heartbeat handling over a real UDP socket.

use meshgate::infrastructure::config::MeshSettings;
use meshgate::mesh::protocol::{self, MessageKind};
use meshgate::mesh::{
    BroadcastBuilder, BroadcastContext, LocalIdentity, MeshMonitor, MeshServerBroadcastData,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const SERVICE: &str = "meshgate-test";

struct Quiet;

impl BroadcastBuilder for Quiet {
    fn build(&self, context: &BroadcastContext<'_>) -> MeshServerBroadcastData {
        MeshServerBroadcastData {
            hostname: context.hostname.to_owned(),
            ..MeshServerBroadcastData::default()
        }
    }
}

fn listening_monitor() -> MeshMonitor {
    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let settings = MeshSettings {
        enable_status_broadcast: false,
        service_name: SERVICE.into(),
        port: 0,
        ..MeshSettings::default()
    };
    MeshMonitor::new(
        settings,
        LocalIdentity::new("node-a", loopback, vec![loopback], 1),
        Arc::new(Quiet),
        reqwest::Client::new(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn heartbeat_and_goodbye_over_udp() {
    let monitor = listening_monitor();
    monitor.start().await.expect("monitor starts on an ephemeral port");
    assert!(monitor.is_running());

    let port = monitor.local_udp_addr().expect("socket bound").port();
    let target = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

    let peer = MeshServerBroadcastData {
        hostname: "node-b".into(),
        enabled_routes: Some(vec!["vision/custom".into()]),
        known_hostnames: Some(vec!["node-a".into()]),
        ..MeshServerBroadcastData::default()
    };
    let heartbeat = protocol::encode(SERVICE, MessageKind::Heartbeat, &peer).unwrap();
    sender.send_to(&heartbeat, target).await.unwrap();

    let discovered = wait_until(|| {
        monitor
            .discovered_servers()
            .iter()
            .any(|s| s.status.hostname == "node-b" && s.is_active)
    })
    .await;
    assert!(discovered, "heartbeat was not processed");

    let goodbye = protocol::encode(SERVICE, MessageKind::Goodbye, &peer).unwrap();
    sender.send_to(&goodbye, target).await.unwrap();

    let removed = wait_until(|| {
        !monitor
            .discovered_servers()
            .iter()
            .any(|s| s.status.hostname == "node-b")
    })
    .await;
    assert!(removed, "goodbye was not processed");

    monitor.stop().await;
    assert!(!monitor.is_running());
    assert!(monitor.local_udp_addr().is_none());
}

#[tokio::test]
async fn datagrams_for_other_services_are_ignored() {
    let monitor = listening_monitor();
    monitor.start().await.expect("monitor starts on an ephemeral port");

    let port = monitor.local_udp_addr().expect("socket bound").port();
    let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let stranger = MeshServerBroadcastData {
        hostname: "node-x".into(),
        ..MeshServerBroadcastData::default()
    };
    let datagram = protocol::encode("other-service", MessageKind::Heartbeat, &stranger).unwrap();
    sender
        .send_to(&datagram, (Ipv4Addr::LOCALHOST, port))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !monitor
            .discovered_servers()
            .iter()
            .any(|s| s.status.hostname == "node-x")
    );

    monitor.stop().await;
}
