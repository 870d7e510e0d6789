/// What a queue backend guarantees beyond the base contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapabilities {
    /// Messages survive a process restart
    pub durable: bool,

    /// Several processes can consume the same queue
    pub shared: bool,

    /// Events from other processes show up on `event_stream`
    pub cluster_events: bool,
}

impl QueueCapabilities {
    pub fn in_process() -> Self {
        Self {
            durable: false,
            shared: false,
            cluster_events: false,
        }
    }

    pub fn distributed() -> Self {
        Self {
            durable: true,
            shared: true,
            cluster_events: false,
        }
    }
}

impl Default for QueueCapabilities {
    fn default() -> Self {
        Self::in_process()
    }
}
