// /src/control.rs
//! The control loop.
//!
//! One tick: refresh the LED, check the run switch, poll the alarm inputs,
//! pump modem events, serve calls then SMS (latest first), raise alarm
//! notifications and send at most one queued message.

use embassy_time::Duration;
use heapless::Vec;

use crate::alarms::{InputChannel, NotifyKind};
use crate::alarms_handler::AlarmBank;
use crate::config::POWERON_LABEL_KEY;
use crate::constants::{
    ALARM_CALL_HANGUP_DELAY_MS, CALL_PICKUP_HOLD_MS, FIRMWARE_VERSION, INPUT_CHANNELS_AMOUNT, LED_FATAL_ERROR_BLINKS,
    LED_REGISTRATION_ERROR_BLINKS, MASTER_ASSIGNED_STR, MAX_EVENTS_PER_TICK, NO_MSG_STR, OUTPUT_CHANNELS_AMOUNT,
    REGISTRATION_POLL_MS, REGISTRATION_TIMEOUT_SECONDS, TICK_PERIOD_MS,
};
use crate::custom_strings::{bounded, format_bounded};
use crate::dispatcher::{Dispatcher, HandlerContext};
use crate::error::{ConfigError, FatalError, Message};
use crate::led::{LedPattern, StatusLed};
use crate::notifications::{NotificationBody, NotificationQueue};
use crate::outputs::{OutputChannel, OutputController, detect_output_command};
use crate::phone_book::{PhoneNumber, RightsStore};
use crate::platform::{Clock, DigitalInput, DigitalOutput, ModemChannel, ModemEvent, PersistentStore, SmsMessage};

/// Board I/O handed to the controller.
pub struct Board<I, O> {
    pub inputs: [I; INPUT_CHANNELS_AMOUNT],
    pub relays: [O; OUTPUT_CHANNELS_AMOUNT],
    pub led: O,
    /// Reads high while the loop should keep running.
    pub run_switch: I,
}

/// Why the control loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exit {
    /// The run switch was moved to stop.
    Stopped,
    /// `SAVE,REBOOT` was received.
    Reboot,
}

pub struct Controller<M, I, O, S, C> {
    modem: M,
    inputs: [I; INPUT_CHANNELS_AMOUNT],
    run_switch: I,
    led_pin: O,
    led: StatusLed,
    outputs: OutputController<O>,
    store: S,
    clock: C,
    rights: RightsStore,
    alarms: AlarmBank,
    queue: NotificationQueue,
    dispatcher: Dispatcher,
    awaiting_master: bool,
}

impl<M, I, O, S, C> Controller<M, I, O, S, C>
where
    M: ModemChannel,
    I: DigitalInput,
    O: DigitalOutput,
    S: PersistentStore,
    C: Clock,
{
    /// Builds the controller on the factory configuration. The saved one is
    /// loaded by [`Controller::load_config`] (or at the start of
    /// [`Controller::run`]).
    pub fn new(modem: M, board: Board<I, O>, store: S, clock: C, dispatcher: Dispatcher) -> Self {
        Self {
            modem,
            inputs: board.inputs,
            run_switch: board.run_switch,
            led_pin: board.led,
            led: StatusLed::new(),
            outputs: OutputController::new(board.relays),
            store,
            clock,
            rights: RightsStore::new(),
            alarms: AlarmBank::disabled(),
            queue: NotificationQueue::new(),
            dispatcher,
            awaiting_master: true,
        }
    }

    /// Loads the configuration from the store and builds the alarm monitors.
    /// A bad document or bad alarm tuning is fatal.
    pub fn load_config(&mut self) -> Result<(), FatalError> {
        let rights = RightsStore::load(&mut self.store)?;
        self.alarms = AlarmBank::from_params(rights.params())?;
        self.awaiting_master = rights.master().is_none();
        self.rights = rights;
        Ok(())
    }

    pub fn rights(&self) -> &RightsStore {
        &self.rights
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn modem(&self) -> &M {
        &self.modem
    }

    pub fn modem_mut(&mut self) -> &mut M {
        &mut self.modem
    }

    pub fn outputs(&self) -> &OutputController<O> {
        &self.outputs
    }

    pub fn led(&self) -> &StatusLed {
        &self.led
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Custom handlers can be added here before the loop starts.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn is_awaiting_master(&self) -> bool {
        self.awaiting_master
    }

    /// Loads the configuration, runs the startup sequence then ticks until the run switch stops the
    /// loop or a reboot is requested.
    pub async fn run(&mut self) -> Result<Exit, FatalError> {
        self.load_config()?;
        self.startup().await?;
        loop {
            if let Some(exit) = self.tick().await? {
                info!("Exit: {}", exit);
                return Ok(exit);
            }
            self.clock.sleep(Duration::from_millis(TICK_PERIOD_MS)).await;
        }
    }

    /// Shows the error pattern forever. Only a reset leaves this state.
    pub async fn halt(&mut self, err: FatalError) {
        error!("Unexpected error: {}", err);
        let count = match err {
            FatalError::RegistrationTimeout => LED_REGISTRATION_ERROR_BLINKS,
            _ => LED_FATAL_ERROR_BLINKS,
        };
        let now = self.clock.now();
        self.led.set(LedPattern::Error { count }, now);
        loop {
            self.refresh_led();
            self.clock.sleep(Duration::from_millis(TICK_PERIOD_MS)).await;
        }
    }

    /// Waits for network registration, clears the SMS storage and greets the
    /// master.
    pub async fn startup(&mut self) -> Result<(), FatalError> {
        info!("Starting gate800c v{}", FIRMWARE_VERSION);
        let started = self.clock.now();
        self.led.set(LedPattern::CONNECTING, started);

        let timeout = Duration::from_secs(REGISTRATION_TIMEOUT_SECONDS);
        loop {
            match self.modem.is_registered().await {
                Ok(true) => break,
                Ok(false) => debug!("Waiting for network registration"),
                Err(err) => warn!("Registration query failed: {}", err),
            }
            if self.clock.now().saturating_duration_since(started) >= timeout {
                error!("No network registration after {} s", REGISTRATION_TIMEOUT_SECONDS);
                let now = self.clock.now();
                self.led.set(
                    LedPattern::Error {
                        count: LED_REGISTRATION_ERROR_BLINKS,
                    },
                    now,
                );
                return Err(FatalError::RegistrationTimeout);
            }
            self.hold(Duration::from_millis(REGISTRATION_POLL_MS)).await;
        }
        info!("Registered on the network");

        info!("Clearing stored SMS");
        self.modem.delete_all_sms().await?;

        let now = self.clock.now();
        match self.rights.master() {
            Some(master) => {
                let greeting: Message = format_bounded(format_args!(
                    "v{} {}",
                    FIRMWARE_VERSION,
                    self.rights.params().text(POWERON_LABEL_KEY, NO_MSG_STR)
                ));
                let master: PhoneNumber = bounded(master).unwrap_or_default();
                if let Err(err) = self.modem.send(&master, &greeting).await {
                    warn!("Fail to greet master: {}", err);
                }
                self.led.set(LedPattern::RUNNING, now);
            }
            None => {
                info!("No master phone number! Requires first call...");
                self.led.set(LedPattern::AWAITING_MASTER, now);
            }
        }
        self.refresh_led();
        Ok(())
    }

    /// One pass of the control loop. Returns `Some` when the loop must end.
    pub async fn tick(&mut self) -> Result<Option<Exit>, FatalError> {
        self.refresh_led();
        if !self.run_switch.read() {
            return Ok(Some(Exit::Stopped));
        }

        let now = self.clock.now();
        let mut levels = [false; INPUT_CHANNELS_AMOUNT];
        for (level, input) in levels.iter_mut().zip(self.inputs.iter_mut()) {
            *level = input.read();
        }
        self.alarms.update(levels, now);

        let (mut calls, mut messages) = self.pump_events().await;

        while let Some(phone) = calls.pop() {
            if self.awaiting_master {
                if self.assign_master(&phone).await? {
                    calls.clear();
                    messages.clear();
                }
                continue;
            }
            self.outputs
                .request(OutputChannel::Out1, &phone, &self.rights, &mut self.queue, &mut self.clock)
                .await?;
        }

        let mut reboot = false;
        let mut served_after_save = false;
        while let Some(sms) = messages.pop() {
            served_after_save |= reboot;
            reboot |= self.serve_sms(&sms).await?;
        }
        // Older commands of this tick run after SAVE,REBOOT; keep their changes.
        if reboot && served_after_save {
            info!("Saving changes made after the reboot request");
            self.rights.save(&mut self.store).map_err(ConfigError::from)?;
        }

        for channel in self.alarms.take_triggered() {
            self.notify_alarm(channel).await?;
        }

        self.send_next().await;

        if reboot {
            while !self.queue.is_empty() {
                self.send_next().await;
            }
            return Ok(Some(Exit::Reboot));
        }
        Ok(None)
    }

    /// Reads the pending modem events. Calls are picked up and hung up at
    /// once; SMS are read and deleted from the modem storage.
    async fn pump_events(&mut self) -> (Vec<PhoneNumber, MAX_EVENTS_PER_TICK>, Vec<SmsMessage, MAX_EVENTS_PER_TICK>) {
        let mut calls = Vec::new();
        let mut messages = Vec::new();
        for _ in 0..MAX_EVENTS_PER_TICK {
            let Some(event) = self.modem.poll_event() else {
                break;
            };
            match event {
                ModemEvent::IncomingCall(phone) => {
                    info!("Incoming call from {}", phone);
                    if let Err(err) = self.modem.answer_call().await {
                        warn!("Fail to pick-up the call: {}", err);
                    }
                    self.clock.sleep(Duration::from_millis(CALL_PICKUP_HOLD_MS)).await;
                    if let Err(err) = self.modem.hang_up().await {
                        warn!("Fail to hang-up the call: {}", err);
                    }
                    let _ = calls.push(phone);
                }
                ModemEvent::SmsReceived(id) => {
                    info!("SMS received @ id {}", id);
                    match self.modem.read_sms(id).await {
                        Ok(sms) => {
                            info!("SMS from {}: {}", sms.sender, sms.text);
                            let _ = messages.push(sms);
                        }
                        Err(err) => warn!("Fail to read SMS {}: {}", id, err),
                    }
                    if let Err(err) = self.modem.delete_sms(id).await {
                        warn!("Fail to delete SMS {}: {}", id, err);
                    }
                }
            }
        }
        (calls, messages)
    }

    /// First caller becomes the master. Returns whether it happened.
    async fn assign_master(&mut self, phone: &str) -> Result<bool, FatalError> {
        if let Err(err) = self.rights.assign_master(phone) {
            warn!("Cannot assign master to {}: {}", phone, err);
            return Ok(false);
        }
        info!("Assign master to {}", phone);
        self.rights.save(&mut self.store).map_err(ConfigError::from)?;
        if let Err(err) = self.modem.send(phone, MASTER_ASSIGNED_STR).await {
            warn!("Fail to notify new master: {}", err);
        }
        self.awaiting_master = false;
        let now = self.clock.now();
        self.led.set(LedPattern::RUNNING, now);
        Ok(true)
    }

    /// Output keyword or configuration command. Returns whether a reboot was
    /// requested.
    async fn serve_sms(&mut self, sms: &SmsMessage) -> Result<bool, FatalError> {
        if let Some(channel) = detect_output_command(&sms.text, self.rights.params()) {
            self.outputs
                .request(channel, &sms.sender, &self.rights, &mut self.queue, &mut self.clock)
                .await?;
            return Ok(false);
        }
        let mut ctx = HandlerContext::new(&mut self.rights, &mut self.queue, &mut self.store);
        let outcome = self.dispatcher.dispatch(&mut ctx, &sms.sender, &sms.text);
        debug!("Dispatch outcome: {}", outcome);
        Ok(ctx.reboot_requested)
    }

    async fn notify_alarm(&mut self, channel: InputChannel) -> Result<(), FatalError> {
        info!("Alarm IN{} triggered", channel.number());
        let kind = channel.notify_kind(self.rights.params())?;
        let phones = self.rights.phones_with(channel.notify_right());
        if phones.is_empty() {
            warn!("Nobody to notify for IN{}", channel.number());
            return Ok(());
        }
        match kind {
            NotifyKind::Sms => {
                let key = bounded(channel.label_key()).ok_or(ConfigError::UnknownParameter)?;
                for phone in phones.iter() {
                    self.queue.notify(phone, NotificationBody::Label(key.clone()), None);
                }
            }
            NotifyKind::Call => {
                if let Err(err) = self.modem.hang_up().await {
                    debug!("No call to hang-up: {}", err);
                }
                self.clock.sleep(Duration::from_millis(ALARM_CALL_HANGUP_DELAY_MS)).await;
                info!("Calling {} for IN{}", phones[0], channel.number());
                if let Err(err) = self.modem.dial(&phones[0]).await {
                    warn!("Fail to call {}: {}", phones[0], err);
                }
            }
        }
        Ok(())
    }

    /// Sends one queued notification. Failures are logged and the message is
    /// dropped.
    async fn send_next(&mut self) {
        let Some(outgoing) = self.queue.pop_rendered(self.rights.params()) else {
            return;
        };
        debug!("Sending to {}: {}", outgoing.to, outgoing.text);
        if let Err(err) = self.modem.send(&outgoing.to, &outgoing.text).await {
            warn!("Fail to send notification to {}: {}", outgoing.to, err);
        }
    }

    /// Sleeps while keeping the LED pattern alive.
    async fn hold(&mut self, duration: Duration) {
        let until = self.clock.now() + duration;
        while self.clock.now() < until {
            self.refresh_led();
            let left = until.saturating_duration_since(self.clock.now());
            let step = Duration::from_millis(TICK_PERIOD_MS);
            self.clock.sleep(if left < step { left } else { step }).await;
        }
        self.refresh_led();
    }

    fn refresh_led(&mut self) {
        let level = self.led.level(self.clock.now());
        self.led_pin.set(level);
    }
}
