//! Lifecycle of one direction of a framed channel.
//!
//! ```text
//! Unopened -> Opening -> Opened | Failed
//! Opened -> WaitingForData -> DataAvailable -> WaitingForData -> ...
//! any connected state -> Closed
//! ```

/// State of one framed channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Not opened yet.
    #[default]
    Unopened,
    /// A (possibly blocking) open is in progress.
    Opening,
    /// Open succeeded; no read issued yet.
    Opened,
    /// Open failed.
    Failed,
    /// Blocked in a read with no complete frame buffered.
    WaitingForData,
    /// Bytes are buffered and being scanned for frames.
    DataAvailable,
    /// The peer closed the stream (or the channel was shut down).
    Closed,
}

impl ChannelState {
    /// True for every state in which the underlying stream is open.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ChannelState::Opened | ChannelState::WaitingForData | ChannelState::DataAvailable
        )
    }

    /// Returns a human-readable name for the state.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Unopened => "unopened",
            ChannelState::Opening => "opening",
            ChannelState::Opened => "opened",
            ChannelState::Failed => "failed",
            ChannelState::WaitingForData => "waiting",
            ChannelState::DataAvailable => "data-available",
            ChannelState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_states() {
        assert!(!ChannelState::Unopened.is_connected());
        assert!(!ChannelState::Opening.is_connected());
        assert!(ChannelState::Opened.is_connected());
        assert!(ChannelState::WaitingForData.is_connected());
        assert!(ChannelState::DataAvailable.is_connected());
        assert!(!ChannelState::Failed.is_connected());
        assert!(!ChannelState::Closed.is_connected());
    }

    #[test]
    fn default_is_unopened() {
        assert_eq!(ChannelState::default(), ChannelState::Unopened);
        assert_eq!(ChannelState::default().to_string(), "unopened");
    }
}
