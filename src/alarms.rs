// /src/alarms.rs
//! Per-input alarm state machine.
//!
//! `Off` → `Observing` when the input becomes active, → `Alarmed` once it
//! stayed active for the observation window, → `Idle` on the same update
//! (raising the notification), → `Off` after the idle window or as soon as
//! the input clears when `reset_on_clear` is set.

use embassy_time::{Duration, Instant};

use crate::config::Parameters;
use crate::error::ConfigError;
use crate::rights::Right;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputMode {
    ActiveHigh,
    ActiveLow,
    Disabled,
}

impl InputMode {
    pub fn from_param(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "H" | "h" => Ok(InputMode::ActiveHigh),
            "L" | "l" => Ok(InputMode::ActiveLow),
            "D" | "d" => Ok(InputMode::Disabled),
            _ => Err(ConfigError::InvalidValue),
        }
    }

    /// Whether `level` counts as an alarm signal in this mode.
    pub const fn is_active(self, level: bool) -> bool {
        match self {
            InputMode::ActiveHigh => level,
            InputMode::ActiveLow => !level,
            InputMode::Disabled => false,
        }
    }
}

/// How holders of the input's notify right are told about an alarm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyKind {
    Sms,
    Call,
}

impl NotifyKind {
    pub fn from_param(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "S" | "s" => Ok(NotifyKind::Sms),
            "C" | "c" => Ok(NotifyKind::Call),
            _ => Err(ConfigError::InvalidValue),
        }
    }
}

/// One of the four monitored inputs and the parameter keys that tune it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputChannel {
    In1,
    In2,
    In3,
    In4,
}

struct InputKeys {
    label: &'static str,
    mode: &'static str,
    obs: &'static str,
    idle: &'static str,
    irst: &'static str,
    ntyp: &'static str,
}

macro_rules! input_keys {
    ($n:literal) => {
        InputKeys {
            label: concat!("in", $n, "-label"),
            mode: concat!("in", $n, "-mode"),
            obs: concat!("in", $n, "-obs"),
            idle: concat!("in", $n, "-idle"),
            irst: concat!("in", $n, "-irst"),
            ntyp: concat!("in", $n, "-ntyp"),
        }
    };
}

const INPUT_KEYS: [InputKeys; 4] = [input_keys!("1"), input_keys!("2"), input_keys!("3"), input_keys!("4")];

impl InputChannel {
    pub const ALL: [InputChannel; 4] = [InputChannel::In1, InputChannel::In2, InputChannel::In3, InputChannel::In4];

    pub const fn number(self) -> u8 {
        self as u8 + 1
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn notify_right(self) -> Right {
        match self {
            InputChannel::In1 => Right::NotifyIn1,
            InputChannel::In2 => Right::NotifyIn2,
            InputChannel::In3 => Right::NotifyIn3,
            InputChannel::In4 => Right::NotifyIn4,
        }
    }

    fn keys(self) -> &'static InputKeys {
        &INPUT_KEYS[self.index()]
    }

    pub fn label_key(self) -> &'static str {
        self.keys().label
    }

    pub fn notify_kind(self, params: &Parameters) -> Result<NotifyKind, ConfigError> {
        NotifyKind::from_param(params.text(self.keys().ntyp, ""))
    }
}

/// Tuning of one monitor, read from the parameters at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmSettings {
    pub mode: InputMode,
    pub observation: Duration,
    pub idle: Duration,
    pub reset_on_clear: bool,
}

impl AlarmSettings {
    pub fn from_params(channel: InputChannel, params: &Parameters) -> Result<Self, ConfigError> {
        let keys = channel.keys();
        let mode = InputMode::from_param(params.text(keys.mode, ""))?;
        let observation = non_negative(params.int(keys.obs, -1))?;
        let idle = non_negative(params.int(keys.idle, -1))?;
        let irst = non_negative(params.int(keys.irst, -1))?;
        Ok(Self {
            mode,
            observation: Duration::from_secs(observation),
            idle: Duration::from_secs(idle * 60),
            reset_on_clear: irst > 0,
        })
    }
}

fn non_negative(value: i32) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::InvalidValue)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmState {
    Off,
    Observing,
    Alarmed,
    Idle,
}

pub struct AlarmMonitor {
    channel: InputChannel,
    settings: AlarmSettings,
    state: AlarmState,
    entered_at: Instant,
    pending_notification: bool,
}

impl AlarmMonitor {
    pub fn new(channel: InputChannel, settings: AlarmSettings) -> Self {
        Self {
            channel,
            settings,
            state: AlarmState::Off,
            entered_at: Instant::from_ticks(0),
            pending_notification: false,
        }
    }

    pub fn from_params(channel: InputChannel, params: &Parameters) -> Result<Self, ConfigError> {
        Ok(Self::new(channel, AlarmSettings::from_params(channel, params)?))
    }

    pub fn channel(&self) -> InputChannel {
        self.channel
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn settings(&self) -> &AlarmSettings {
        &self.settings
    }

    /// Advances the state machine with the instantaneous input `level`.
    pub fn update(&mut self, level: bool, now: Instant) {
        if self.settings.mode == InputMode::Disabled {
            return;
        }
        let active = self.settings.mode.is_active(level);

        match self.state {
            AlarmState::Off => {
                if active {
                    self.enter(AlarmState::Observing, now);
                    self.pending_notification = false;
                }
            }
            AlarmState::Observing => {
                if !active {
                    self.enter(AlarmState::Off, now);
                } else if self.elapsed(now) >= self.settings.observation {
                    self.enter(AlarmState::Alarmed, now);
                    self.raise(now);
                }
            }
            AlarmState::Alarmed => self.raise(now),
            AlarmState::Idle => {
                if (self.settings.reset_on_clear && !active) || self.elapsed(now) >= self.settings.idle {
                    self.enter(AlarmState::Off, now);
                }
            }
        }
    }

    /// Returns the alarm flag and clears it: true at most once per episode.
    pub fn consume_notification(&mut self) -> bool {
        core::mem::take(&mut self.pending_notification)
    }

    fn raise(&mut self, now: Instant) {
        info!("IN{} alarm raised", self.channel.number());
        self.pending_notification = true;
        self.enter(AlarmState::Idle, now);
    }

    fn enter(&mut self, state: AlarmState, now: Instant) {
        debug!("IN{} {} -> {}", self.channel.number(), self.state, state);
        self.state = state;
        self.entered_at = now;
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.checked_duration_since(self.entered_at).unwrap_or(Duration::from_ticks(0))
    }
}
