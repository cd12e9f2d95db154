use super::message::Message;

/// Something an engine wants done on a connection. Hosts drain these after
/// every event and carry them out in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send(Message),
    Close,
}
