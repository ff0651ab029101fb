// /src/platform.rs
//! Collaborators the control loop drives: the cellular modem, digital I/O,
//! persistent storage and the clock. The firmware binds them to the board;
//! tests bind them to in-memory fakes.
#![allow(async_fn_in_trait)]

use embassy_time::{Duration, Instant};

use crate::error::{Message, ModemError, StoreError};
use crate::phone_book::PhoneNumber;

/// Storage slot of a received SMS in the modem memory.
pub type SmsId = u16;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemEvent {
    IncomingCall(PhoneNumber),
    SmsReceived(SmsId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SmsMessage {
    pub sender: PhoneNumber,
    pub text: Message,
}

pub trait ModemChannel {
    /// Whether the modem is registered on the cellular network.
    async fn is_registered(&mut self) -> Result<bool, ModemError>;

    async fn send(&mut self, phone: &str, text: &str) -> Result<(), ModemError>;

    /// Next unsolicited event, if any arrived.
    fn poll_event(&mut self) -> Option<ModemEvent>;

    async fn read_sms(&mut self, id: SmsId) -> Result<SmsMessage, ModemError>;

    async fn delete_sms(&mut self, id: SmsId) -> Result<(), ModemError>;

    /// Deletes every SMS stored in the modem.
    async fn delete_all_sms(&mut self) -> Result<(), ModemError>;

    async fn answer_call(&mut self) -> Result<(), ModemError>;

    async fn hang_up(&mut self) -> Result<(), ModemError>;

    /// Places a voice call.
    async fn dial(&mut self, phone: &str) -> Result<(), ModemError>;
}

pub trait DigitalInput {
    fn read(&mut self) -> bool;
}

pub trait DigitalOutput {
    fn set(&mut self, high: bool);
}

pub trait PersistentStore {
    fn exists(&mut self) -> bool;

    /// Reads the stored document into `buf`, returning its length.
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StoreError>;

    fn save(&mut self, bytes: &[u8]) -> Result<(), StoreError>;
}

pub trait Clock {
    fn now(&self) -> Instant;

    /// Suspends the caller. Everything else on the control loop waits too.
    async fn sleep(&mut self, duration: Duration);
}
