//! Reconnect backoff policy
//!
//! Pure arithmetic over the interval table in [`ReconnectConfig`]: given why
//! a reconnect is being considered and how alive the application currently
//! is, produce the wait before the next connect attempt. The runtime anchors
//! the wait at the last resolution time, so a long-disconnected client
//! reconnects immediately while a flapping one backs off.

use std::time::Duration;

use relink_core::config::{ReconnectConfig, ReconnectTrigger};
use relink_core::{AppState, NetworkKind};

pub(crate) struct ReconnectMonitor {
    config: ReconnectConfig,
}

impl ReconnectMonitor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Wait before the next connect attempt, measured from the last
    /// candidate resolution.
    pub fn delay_for(
        &self,
        trigger: ReconnectTrigger,
        app_state: AppState,
        network: NetworkKind,
        has_account: bool,
    ) -> Duration {
        // a dormant client with no credentials has nothing to reconnect for
        if !app_state.is_active() && !has_account {
            return self.config.inactive_no_account;
        }

        let mut secs = self.config.intervals_secs[trigger.row()][column(app_state)];
        if !network.is_available() {
            secs = secs * self.config.no_net_rate + self.config.no_net_rise_secs;
        }
        if !has_account {
            secs = secs * self.config.no_account_rate + self.config.no_account_rise_secs;
        }
        Duration::from_secs(secs)
    }

    /// How long to wait before re-evaluating after a Disconnected or
    /// ConnectFailed transition.
    pub fn reevaluate_delay(&self) -> Duration {
        self.config.reevaluate_delay
    }
}

fn column(state: AppState) -> usize {
    match state {
        AppState::ForegroundFresh => 0,
        AppState::ForegroundRecent => 1,
        AppState::ForegroundStable => 2,
        AppState::BackgroundActive => 3,
        AppState::Inactive => 4,
    }
}
