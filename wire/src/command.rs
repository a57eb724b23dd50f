use serde::{Deserialize, Serialize};

/// The closed set of protocol message kinds.
///
/// Every dispatch or monitoring exchange starts with exactly one `Command`
/// frame; payload frames follow where the command calls for them. A frame
/// that fails to decode as a `Command` is skipped by servers, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Ping,
    Pong,
    Init,
    Data,
    MonitorSubscribe,
    MonitorUnsubscribe,
    MonitorUpdate,
}
