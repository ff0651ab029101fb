// /src/lib.rs
//! Control logic of a cellular gate/relay controller: alarm inputs, SMS and
//! call commands checked against a phone-number rights store, relay outputs
//! and the outbound SMS queue.
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod alarms;
pub mod alarms_handler;
pub mod config;
pub mod constants;
pub mod control;
pub mod custom_strings;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod led;
pub mod notifications;
pub mod outputs;
pub mod phone_book;
pub mod platform;
pub mod rights;
