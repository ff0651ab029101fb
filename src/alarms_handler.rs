// /src/alarms_handler.rs
use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::alarms::{AlarmMonitor, AlarmSettings, InputChannel, InputMode};
use crate::config::Parameters;
use crate::constants::INPUT_CHANNELS_AMOUNT;
use crate::error::ConfigError;

/// The four input monitors, polled together once per tick.
pub struct AlarmBank {
    monitors: [AlarmMonitor; INPUT_CHANNELS_AMOUNT],
}

impl AlarmBank {
    /// Builds every monitor from the parameters. Any invalid tuning fails the
    /// whole bank.
    pub fn from_params(params: &Parameters) -> Result<Self, ConfigError> {
        let [in1, in2, in3, in4] = InputChannel::ALL;
        Ok(Self {
            monitors: [
                AlarmMonitor::from_params(in1, params)?,
                AlarmMonitor::from_params(in2, params)?,
                AlarmMonitor::from_params(in3, params)?,
                AlarmMonitor::from_params(in4, params)?,
            ],
        })
    }

    /// Bank that never raises an alarm, used until the parameters are loaded.
    pub fn disabled() -> Self {
        let settings = AlarmSettings {
            mode: InputMode::Disabled,
            observation: Duration::from_secs(0),
            idle: Duration::from_secs(0),
            reset_on_clear: false,
        };
        Self {
            monitors: InputChannel::ALL.map(|channel| AlarmMonitor::new(channel, settings)),
        }
    }

    pub fn update(&mut self, levels: [bool; INPUT_CHANNELS_AMOUNT], now: Instant) {
        for (monitor, level) in self.monitors.iter_mut().zip(levels) {
            monitor.update(level, now);
        }
    }

    /// Channels whose alarm fired since the last call.
    pub fn take_triggered(&mut self) -> Vec<InputChannel, INPUT_CHANNELS_AMOUNT> {
        let mut triggered = Vec::new();
        for monitor in self.monitors.iter_mut() {
            if monitor.consume_notification() {
                let _ = triggered.push(monitor.channel());
            }
        }
        triggered
    }

    pub fn monitor(&self, channel: InputChannel) -> &AlarmMonitor {
        &self.monitors[channel.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::AlarmState;

    #[test]
    fn only_enabled_inputs_trigger() {
        let mut params = Parameters::with_defaults();
        params.set_from_text("in2-mode", "H").unwrap();
        params.set_from_text("in2-obs", "1").unwrap();
        let mut bank = AlarmBank::from_params(&params).unwrap();

        bank.update([true; 4], Instant::from_millis(0));
        bank.update([true; 4], Instant::from_millis(1_000));
        assert_eq!(bank.take_triggered().as_slice(), &[InputChannel::In2]);
        assert!(bank.take_triggered().is_empty());
        assert_eq!(bank.monitor(InputChannel::In1).state(), AlarmState::Off);
        assert_eq!(bank.monitor(InputChannel::In2).state(), AlarmState::Idle);
    }

    #[test]
    fn invalid_tuning_fails_the_bank() {
        let mut params = Parameters::with_defaults();
        params.set_value("in3-obs", crate::config::ParamValue::Int(2)).unwrap();
        assert!(AlarmBank::from_params(&params).is_ok());

        let mut broken: crate::phone_book::RightsStore =
            serde_json_core::from_str(r#"{"version":1,"main":{"in3-mode":"X"},"admins":{},"users":{}}"#)
                .unwrap()
                .0;
        assert_eq!(broken.upgrade(), Err(ConfigError::InvalidValue));
        assert!(AlarmBank::from_params(broken.params()).is_err());
    }
}
