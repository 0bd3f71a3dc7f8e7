/// Peer lifecycle state: `open -> closing -> closed`, terminal at
/// `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Open,
    Closing,
    Closed,
}
