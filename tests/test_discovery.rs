use std::net::SocketAddr;
use std::time::Duration;

use earshot::driver::discovery::{discover, discover_or_local, request, DiscoveredAddr};
use tokio::net::UdpSocket;

async fn pair() -> (UdpSocket, UdpSocket) {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(server.local_addr().unwrap()).await.unwrap();

    (server, client)
}

fn response(ip: &str, port: u16) -> [u8; 74] {
    let mut bytes = [0u8; 74];
    bytes[..2].copy_from_slice(&2u16.to_be_bytes());
    bytes[2..4].copy_from_slice(&70u16.to_be_bytes());
    bytes[4..8].copy_from_slice(&1001u32.to_be_bytes());
    bytes[8..8 + ip.len()].copy_from_slice(ip.as_bytes());
    bytes[72..].copy_from_slice(&port.to_be_bytes());
    bytes
}

#[tokio::test]
async fn discovery_over_loopback() {
    let (server, client) = pair().await;

    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 128];
        let (len, from) = server.recv_from(&mut buf).await.unwrap();

        assert_eq!(&buf[..len], &request(1001)[..]);
        server.send_to(&response("198.51.100.7", 61234), from).await.unwrap();
    });

    let found = discover(&client, 1001, Duration::from_secs(3)).await.unwrap();
    responder.await.unwrap();

    assert_eq!(found, "198.51.100.7:61234".parse::<SocketAddr>().unwrap());
}

#[tokio::test]
async fn silent_server_falls_back_to_local_address() {
    let (_server, client) = pair().await;

    let found = discover_or_local(&client, 1001, Duration::from_millis(50)).await.unwrap();

    assert_eq!(found, DiscoveredAddr::Local(client.local_addr().unwrap()));
}

#[tokio::test]
async fn malformed_reply_falls_back_to_local_address() {
    let (server, client) = pair().await;

    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 128];
        let (_, from) = server.recv_from(&mut buf).await.unwrap();

        // One byte short of a valid reply.
        server.send_to(&response("198.51.100.7", 61234)[..73], from).await.unwrap();
    });

    let found = discover_or_local(&client, 1001, Duration::from_secs(3)).await.unwrap();
    responder.await.unwrap();

    assert!(matches!(found, DiscoveredAddr::Local(_)));
    assert_eq!(found.addr(), client.local_addr().unwrap());
}
