//! Heartbeat pacing
//!
//! Fixed interval by default. The adaptive mode probes upward: every
//! confirmed heartbeat while still probing lengthens the interval by one
//! step, a miss steps back and locks the interval in. NAT/carrier state
//! typically survives somewhere in the configured range; probing finds the
//! longest interval that still keeps it alive.

use std::time::Duration;

use relink_core::config::HeartbeatConfig;
use tracing::debug;

#[derive(Debug)]
pub struct HeartbeatPacer {
    config: HeartbeatConfig,
    current: Duration,
    /// Set once a miss ends the probing phase
    settled: bool,
}

impl HeartbeatPacer {
    pub fn new(config: HeartbeatConfig) -> Self {
        let current = if config.adaptive {
            config.min_interval
        } else {
            config.fixed_interval
        };
        Self {
            config,
            current,
            settled: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.current
    }

    pub fn reply_timeout(&self) -> Duration {
        self.config.reply_timeout
    }

    /// The heartbeat was answered in time.
    pub fn on_success(&mut self) {
        if !self.config.adaptive || self.settled || self.current >= self.config.max_interval {
            return;
        }
        self.current = (self.current + self.config.step).min(self.config.max_interval);
        debug!(interval = ?self.current, "heartbeat interval stepped up");
    }

    /// The reply deadline passed. Step back and stop probing.
    pub fn on_miss(&mut self) {
        if !self.config.adaptive {
            return;
        }
        self.current = self
            .current
            .saturating_sub(self.config.step)
            .max(self.config.min_interval);
        self.settled = true;
        debug!(interval = ?self.current, "heartbeat interval settled after miss");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adaptive() -> HeartbeatConfig {
        HeartbeatConfig {
            adaptive: true,
            ..HeartbeatConfig::default()
        }
    }

    #[test]
    fn fixed_mode_never_moves() {
        let mut pacer = HeartbeatPacer::new(HeartbeatConfig::default());
        let interval = pacer.interval();
        pacer.on_success();
        pacer.on_miss();
        assert_eq!(pacer.interval(), interval);
    }

    #[test]
    fn adaptive_steps_up_to_the_ceiling() {
        let mut pacer = HeartbeatPacer::new(adaptive());
        assert_eq!(pacer.interval(), Duration::from_secs(180));
        pacer.on_success();
        assert_eq!(pacer.interval(), Duration::from_secs(240));
        pacer.on_success();
        assert_eq!(pacer.interval(), Duration::from_secs(290));
        pacer.on_success();
        assert_eq!(pacer.interval(), Duration::from_secs(290));
    }

    #[test]
    fn a_miss_steps_back_and_settles() {
        let mut pacer = HeartbeatPacer::new(adaptive());
        pacer.on_success();
        pacer.on_success();
        pacer.on_miss();
        assert_eq!(pacer.interval(), Duration::from_secs(230));
        // settled: further successes no longer probe upward
        pacer.on_success();
        assert_eq!(pacer.interval(), Duration::from_secs(230));
    }
}
