use serde::{Deserialize, Serialize};

/// Wire message shared by the demo server and client binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Ping(u64),
    Pong(u64),
}
