// /src/outputs.rs
//! Relay outputs and the keyword/call requests that drive them.

use embassy_time::Duration;

use crate::config::Parameters;
use crate::constants::{COMMAND_DELIMITER, DENIED_STR, DONE_STR, OUTPUT_CHANNELS_AMOUNT};
use crate::custom_strings::{bounded, contains_ignore_case, extract_before_delimiter};
use crate::error::ConfigError;
use crate::notifications::{NotificationBody, NotificationQueue};
use crate::phone_book::RightsStore;
use crate::platform::{Clock, DigitalOutput};
use crate::rights::Right;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputChannel {
    Out1,
    Out2,
}

struct OutputKeys {
    label: &'static str,
    cmd: &'static str,
    mode: &'static str,
    sec: &'static str,
}

const OUTPUT_KEYS: [OutputKeys; OUTPUT_CHANNELS_AMOUNT] = [
    OutputKeys {
        label: "out1-label",
        cmd: "out1-cmd",
        mode: "out1-mode",
        sec: "out1-sec",
    },
    OutputKeys {
        label: "out2-label",
        cmd: "out2-cmd",
        mode: "out2-mode",
        sec: "out2-sec",
    },
];

impl OutputChannel {
    pub const ALL: [OutputChannel; OUTPUT_CHANNELS_AMOUNT] = [OutputChannel::Out1, OutputChannel::Out2];

    pub const fn number(self) -> u8 {
        self as u8 + 1
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Right needed to trigger the output.
    pub const fn can_right(self) -> Right {
        match self {
            OutputChannel::Out1 => Right::CanOut1,
            OutputChannel::Out2 => Right::CanOut2,
        }
    }

    /// Right of the phones told about each activation.
    pub const fn notify_right(self) -> Right {
        match self {
            OutputChannel::Out1 => Right::NotifyOut1,
            OutputChannel::Out2 => Right::NotifyOut2,
        }
    }

    fn keys(self) -> &'static OutputKeys {
        &OUTPUT_KEYS[self.index()]
    }

    pub fn label_key(self) -> &'static str {
        self.keys().label
    }

    /// Keyword that triggers the output from an SMS.
    pub fn keyword(self, params: &Parameters) -> &str {
        params.text(self.keys().cmd, "").trim()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputMode {
    /// Drive high, hold, release.
    Pulse(Duration),
    /// Flip the remembered state.
    Toggle,
}

impl OutputMode {
    pub fn from_params(channel: OutputChannel, params: &Parameters) -> Result<Self, ConfigError> {
        let keys = channel.keys();
        match params.text(keys.mode, "") {
            "P" | "p" => {
                let seconds = u64::try_from(params.int(keys.sec, -1)).map_err(|_| ConfigError::InvalidValue)?;
                Ok(OutputMode::Pulse(Duration::from_secs(seconds)))
            }
            "T" | "t" => Ok(OutputMode::Toggle),
            _ => Err(ConfigError::InvalidValue),
        }
    }
}

/// Output whose keyword appears in the first field of `text`, if any.
/// OUT1 wins when both keywords match. An empty keyword never matches.
pub fn detect_output_command(text: &str, params: &Parameters) -> Option<OutputChannel> {
    let field = extract_before_delimiter(text, COMMAND_DELIMITER).trim();
    OutputChannel::ALL
        .into_iter()
        .find(|channel| contains_ignore_case(field, channel.keyword(params)))
}

/// Drives the relays. Toggle state lives here and starts released.
pub struct OutputController<O> {
    relays: [O; OUTPUT_CHANNELS_AMOUNT],
    latched: [bool; OUTPUT_CHANNELS_AMOUNT],
}

impl<O: DigitalOutput> OutputController<O> {
    pub fn new(mut relays: [O; OUTPUT_CHANNELS_AMOUNT]) -> Self {
        for relay in relays.iter_mut() {
            relay.set(false);
        }
        Self {
            relays,
            latched: [false; OUTPUT_CHANNELS_AMOUNT],
        }
    }

    pub fn is_latched(&self, channel: OutputChannel) -> bool {
        self.latched[channel.index()]
    }

    pub fn relay(&self, channel: OutputChannel) -> &O {
        &self.relays[channel.index()]
    }

    /// Acts on `channel` according to its configured mode. A pulse holds the
    /// caller for the whole duration.
    pub async fn actuate<C: Clock>(&mut self, channel: OutputChannel, params: &Parameters, clock: &mut C) -> Result<(), ConfigError> {
        let index = channel.index();
        match OutputMode::from_params(channel, params)? {
            OutputMode::Pulse(duration) => {
                info!("OUT{} pulse for {} ms", channel.number(), duration.as_millis());
                self.relays[index].set(true);
                clock.sleep(duration).await;
                self.relays[index].set(false);
            }
            OutputMode::Toggle => {
                self.latched[index] = !self.latched[index];
                info!("OUT{} toggled to {}", channel.number(), self.latched[index]);
                self.relays[index].set(self.latched[index]);
            }
        }
        Ok(())
    }

    /// Handles an activation request from `requester` (call or SMS).
    ///
    /// Returns whether the output was actuated. Replies and fan-out
    /// notifications are queued either way.
    pub async fn request<C: Clock>(
        &mut self,
        channel: OutputChannel,
        requester: &str,
        rights: &RightsStore,
        queue: &mut NotificationQueue,
        clock: &mut C,
    ) -> Result<bool, ConfigError> {
        if !rights.has_right(requester, channel.can_right()) {
            warn!("Unauthorized CAN_OUT{} for {}", channel.number(), requester);
            queue.notify_text(requester, DENIED_STR, None);
            queue.notify_master(
                rights,
                NotificationBody::literal(format_args!("CAN_OUT{} denied", channel.number())),
                Some(requester),
            );
            return Ok(false);
        }

        info!("Authorized CAN_OUT{} for {}", channel.number(), requester);
        self.actuate(channel, rights.params(), clock).await?;
        queue.notify_text(requester, DONE_STR, None);
        if let Some(key) = bounded(channel.label_key()) {
            queue.notify_right(rights, channel.notify_right(), NotificationBody::Label(key), Some(requester));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_time::Instant;

    const MASTER: &str = "+32444000001";
    const USER: &str = "+32444000003";
    const STRANGER: &str = "+32444000009";

    #[derive(Default)]
    struct Relay {
        history: std::vec::Vec<bool>,
    }

    impl DigitalOutput for Relay {
        fn set(&mut self, high: bool) {
            self.history.push(high);
        }
    }

    #[derive(Default)]
    struct FakeClock {
        now: u64,
        slept: std::vec::Vec<Duration>,
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            Instant::from_millis(self.now)
        }

        async fn sleep(&mut self, duration: Duration) {
            self.now += duration.as_millis();
            self.slept.push(duration);
        }
    }

    fn rights() -> RightsStore {
        let mut rights = RightsStore::new();
        rights.assign_master(MASTER).unwrap();
        rights.add_user(USER).unwrap();
        rights
    }

    #[test]
    fn detects_keywords_in_first_field() {
        let mut params = Parameters::with_defaults();
        assert_eq!(detect_output_command("please out1 now", &params), Some(OutputChannel::Out1));
        assert_eq!(detect_output_command("Out2", &params), Some(OutputChannel::Out2));
        assert_eq!(detect_output_command("PSET,out1-sec,5", &params), None);
        assert_eq!(detect_output_command("hello", &params), None);

        params.set_from_text("out1-cmd", "").unwrap();
        assert_eq!(detect_output_command("anything", &params), None);
        params.set_from_text("out2-cmd", "open").unwrap();
        assert_eq!(detect_output_command("OPEN gate", &params), Some(OutputChannel::Out2));
    }

    #[test]
    fn pulse_holds_for_configured_seconds() {
        let params = Parameters::with_defaults();
        let mut outputs = OutputController::new([Relay::default(), Relay::default()]);
        let mut clock = FakeClock::default();
        block_on(outputs.actuate(OutputChannel::Out1, &params, &mut clock)).unwrap();
        assert_eq!(outputs.relay(OutputChannel::Out1).history, [false, true, false]);
        assert_eq!(outputs.relay(OutputChannel::Out2).history, [false]);
        assert_eq!(clock.slept, [Duration::from_secs(3)]);
    }

    #[test]
    fn toggle_flips_without_waiting() {
        let mut params = Parameters::with_defaults();
        params.set_from_text("out2-mode", "T").unwrap();
        let mut outputs = OutputController::new([Relay::default(), Relay::default()]);
        let mut clock = FakeClock::default();
        block_on(outputs.actuate(OutputChannel::Out2, &params, &mut clock)).unwrap();
        assert!(outputs.is_latched(OutputChannel::Out2));
        block_on(outputs.actuate(OutputChannel::Out2, &params, &mut clock)).unwrap();
        assert!(!outputs.is_latched(OutputChannel::Out2));
        assert_eq!(outputs.relay(OutputChannel::Out2).history, [false, true, false]);
        assert!(clock.slept.is_empty());
    }

    #[test]
    fn authorized_request_notifies_watchers() {
        let mut rights = rights();
        rights.grant(USER, Right::NotifyOut1).unwrap();
        let mut outputs = OutputController::new([Relay::default(), Relay::default()]);
        let mut queue = NotificationQueue::new();
        let mut clock = FakeClock::default();

        let fired = block_on(outputs.request(OutputChannel::Out1, USER, &rights, &mut queue, &mut clock)).unwrap();
        assert!(fired);
        assert_eq!(outputs.relay(OutputChannel::Out1).history, [false, true, false]);

        let mut sent = std::vec::Vec::new();
        while let Some(outgoing) = queue.pop_rendered(rights.params()) {
            sent.push((outgoing.to.as_str().to_owned(), outgoing.text.as_str().to_owned()));
        }
        sent.sort();
        assert_eq!(
            sent,
            [
                (MASTER.to_owned(), "+32444000003 : OUT1 activated".to_owned()),
                (USER.to_owned(), "+32444000003 : OUT1 activated".to_owned()),
                (USER.to_owned(), "Done".to_owned()),
            ]
        );
    }

    #[test]
    fn out2_notifies_only_out2_watchers() {
        const WATCHER: &str = "+32444000004";
        let mut rights = rights();
        rights.grant(USER, Right::CanOut2).unwrap();
        rights.grant(USER, Right::NotifyOut1).unwrap();
        rights.add_user(WATCHER).unwrap();
        rights.grant(WATCHER, Right::NotifyOut2).unwrap();
        let mut outputs = OutputController::new([Relay::default(), Relay::default()]);
        let mut queue = NotificationQueue::new();
        let mut clock = FakeClock::default();

        let fired = block_on(outputs.request(OutputChannel::Out2, USER, &rights, &mut queue, &mut clock)).unwrap();
        assert!(fired);
        assert_eq!(outputs.relay(OutputChannel::Out1).history, [false]);
        assert_eq!(outputs.relay(OutputChannel::Out2).history, [false, true, false]);

        let mut sent = std::vec::Vec::new();
        while let Some(outgoing) = queue.pop_rendered(rights.params()) {
            sent.push((outgoing.to.as_str().to_owned(), outgoing.text.as_str().to_owned()));
        }
        sent.sort();
        assert_eq!(
            sent,
            [
                (MASTER.to_owned(), "+32444000003 : OUT2 activated".to_owned()),
                (USER.to_owned(), "Done".to_owned()),
                (WATCHER.to_owned(), "+32444000003 : OUT2 activated".to_owned()),
            ]
        );
    }

    #[test]
    fn unauthorized_request_is_reported_to_master() {
        let rights = rights();
        let mut outputs = OutputController::new([Relay::default(), Relay::default()]);
        let mut queue = NotificationQueue::new();
        let mut clock = FakeClock::default();

        for requester in [USER, STRANGER] {
            let fired = block_on(outputs.request(OutputChannel::Out2, requester, &rights, &mut queue, &mut clock)).unwrap();
            assert!(!fired);
        }
        assert_eq!(outputs.relay(OutputChannel::Out2).history, [false]);
        let master_notes: std::vec::Vec<_> = queue.iter().filter(|n| n.to.as_str() == MASTER).collect();
        assert_eq!(master_notes.len(), 2);
        assert_eq!(master_notes[0].body, NotificationBody::parse("CAN_OUT2 denied"));
        assert_eq!(master_notes[1].about.as_deref(), Some(STRANGER));
    }

    #[test]
    fn invalid_mode_is_a_config_error() {
        let document: RightsStore =
            serde_json_core::from_str(r#"{"version":1,"main":{"out1-mode":"Z"},"admins":{},"users":{}}"#)
                .unwrap()
                .0;
        assert_eq!(
            OutputMode::from_params(OutputChannel::Out1, document.params()),
            Err(ConfigError::InvalidValue)
        );
    }
}
