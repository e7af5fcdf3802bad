//! Session configuration.

use super::error::{Error, Result};

/// Upper bound on groups per session: one bind-group message is issued
/// per group, sequentially, during the handshake.
pub const MAX_GROUPS: usize = 32;

/// Configuration for an NFLOG session.
///
/// # Example
///
/// ```ignore
/// use nflog::Config;
///
/// let config = Config::new()
///     .group(32)
///     .copy_range(64)
///     .report_errors(true);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) groups: Vec<u16>,
    pub(crate) copy_range: u32,
    pub(crate) report_errors: bool,
}

impl Config {
    /// Create an empty configuration. At least one group must be added
    /// before the session is opened.
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            copy_range: 0,
            report_errors: false,
        }
    }

    /// Listen on a log group. Groups are bound in the order given.
    pub fn group(mut self, group: u16) -> Self {
        self.groups.push(group);
        self
    }

    /// Listen on several log groups.
    pub fn groups<I: IntoIterator<Item = u16>>(mut self, groups: I) -> Self {
        self.groups.extend(groups);
        self
    }

    /// Max bytes of packet payload to capture per message. Zero (the
    /// default) captures the whole packet.
    pub fn copy_range(mut self, bytes: u32) -> Self {
        self.copy_range = bytes;
        self
    }

    /// Deliver decode and read errors on the session's error channel.
    ///
    /// When enabled, the error channel must actually be drained: the
    /// receive loop blocks on it when reporting, so an unread channel
    /// stalls record delivery.
    pub fn report_errors(mut self, enabled: bool) -> Self {
        self.report_errors = enabled;
        self
    }

    /// Check the configuration. Runs before any socket is opened.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(Error::Config("no groups defined".into()));
        }
        if self.groups.len() > MAX_GROUPS {
            return Err(Error::Config(format!(
                "number of groups should be <= {}",
                MAX_GROUPS
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
