#[derive(Debug)]
pub enum UdpRxMessage {
    Poison,
}
