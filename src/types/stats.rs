//! Per-session traffic counters.

/// Counters kept by a session.
///
/// A steadily rising `checksum_errors` count is the usual sign of an
/// unhealthy cable or baud rate mismatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Valid frames decoded.
    pub frames_received: u64,
    /// Frames queued for sending.
    pub frames_sent: u64,
    /// Frames dropped for bad COBS, truncation or unknown kind.
    pub framing_errors: u64,
    /// Frames dropped for a checksum mismatch.
    pub checksum_errors: u64,
    /// Valid frames the session did not act on.
    pub ignored: u64,
}

impl SessionStats {
    /// Total frames discarded at the codec level.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.framing_errors + self.checksum_errors
    }
}
