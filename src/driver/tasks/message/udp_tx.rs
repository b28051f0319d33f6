#[derive(Debug)]
pub enum UdpTxMessage {
    Poison,
}
