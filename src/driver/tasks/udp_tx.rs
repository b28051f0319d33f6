use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use flume::Receiver;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, instrument, trace};

use super::message::*;
use crate::constants::*;

/// Counter carried by each UDP keepalive frame.
#[derive(Debug, Default)]
pub(crate) struct Keepalive {
    counter: u64,
}

impl Keepalive {
    pub(crate) const LEN: usize = 8;

    /// Returns the next frame: the counter as a little-endian `u64`, wrapping on overflow.
    pub(crate) fn next_frame(&mut self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        LittleEndian::write_u64(&mut bytes, self.counter);
        self.counter = self.counter.wrapping_add(1);

        bytes
    }
}

#[instrument(skip(udp_msg_rx, udp_tx))]
pub(crate) async fn runner(udp_msg_rx: Receiver<UdpTxMessage>, udp_tx: Arc<UdpSocket>) {
    info!("UDP transmit handle started.");

    let mut keepalive = Keepalive::default();
    let mut ka_time = Instant::now() + UDP_KEEPALIVE_GAP;

    loop {
        match timeout_at(ka_time, udp_msg_rx.recv_async()).await {
            Err(_) => {
                trace!("Sending UDP Keepalive.");
                if let Err(e) = udp_tx.send(&keepalive.next_frame()).await {
                    error!("Fatal UDP keepalive send error: {:?}.", e);
                    break;
                }
                ka_time += UDP_KEEPALIVE_GAP;
            },
            Ok(Ok(UdpTxMessage::Poison) | Err(_)) => {
                break;
            },
        }
    }

    info!("UDP transmit handle stopped.");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn keepalive_counts_up_little_endian() {
        let mut ka = Keepalive::default();

        assert_eq!(ka.next_frame(), [0; 8]);
        assert_eq!(ka.next_frame(), [1, 0, 0, 0, 0, 0, 0, 0]);

        ka.counter = 0x0102;
        assert_eq!(ka.next_frame(), [2, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn keepalive_wraps() {
        let mut ka = Keepalive {
            counter: u64::MAX,
        };

        assert_eq!(ka.next_frame(), [0xff; 8]);
        assert_eq!(ka.next_frame(), [0; 8]);
    }

    #[tokio::test]
    async fn keepalives_sent_until_poisoned() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();

        let (tx, rx) = flume::unbounded();

        tokio::time::pause();
        let handle = tokio::spawn(runner(rx, Arc::new(client)));

        let mut buf = [0u8; 16];
        for expected in 0u8..2 {
            let len = server.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &[expected, 0, 0, 0, 0, 0, 0, 0]);
        }

        tx.send(UdpTxMessage::Poison).unwrap();
        tokio::time::timeout(Duration::from_secs(30), handle).await.unwrap().unwrap();
    }
}
