// /src/constants.rs
pub const FIRMWARE_VERSION: &str = "0.1.0";
pub const CONFIG_VERSION: u32 = 1;

pub const INPUT_CHANNELS_AMOUNT: usize = 4;
pub const OUTPUT_CHANNELS_AMOUNT: usize = 2;

pub const DONE_STR: &str = "Done";
pub const DENIED_STR: &str = "Denied!";
pub const ERROR_STR: &str = "ERROR!";
pub const INVALID_FORMAT_STR: &str = "Invalid format!";
pub const NO_USER_STR: &str = "No user!";
pub const NO_MSG_STR: &str = "no-msg";
pub const MASTER_ASSIGNED_STR: &str = "You are master now!";

pub const LABEL_PREFIX: char = '@';
pub const COMMAND_DELIMITER: char = ',';

pub const MAX_PHONE_LENGTH: usize = 20;
pub const MAX_ADMIN_COUNT: usize = 8;
pub const MAX_USER_COUNT: usize = 32;
pub const MAX_PHONE_COUNT: usize = MAX_ADMIN_COUNT + MAX_USER_COUNT;

pub const SMS_TEXT_LENGTH: usize = 160;
pub const GATE_SHORTCODE_LENGTH: usize = 6;
pub const OPEN_SHORTCODE_LENGTH: usize = 41;
pub const MAX_PARAM1_LENGTH: usize = 20;
pub const MAX_PARAM2_LENGTH: usize = 30;

pub const PARAM_KEY_LENGTH: usize = 16;
pub const PARAM_VALUE_LENGTH: usize = 30;
pub const MAX_PARAM_COUNT: usize = 40;

pub const MAX_HANDLER_COUNT: usize = 16;
pub const NOTIFICATION_QUEUE_DEPTH: usize = 16;
pub const MAX_EVENTS_PER_TICK: usize = 4;

pub const CONFIG_BUFFER_SIZE: usize = 4096;

pub const TICK_PERIOD_MS: u64 = 20;
pub const REGISTRATION_TIMEOUT_SECONDS: u64 = 120;
pub const REGISTRATION_POLL_MS: u64 = 1000;
pub const CALL_PICKUP_HOLD_MS: u64 = 100;
pub const ALARM_CALL_HANGUP_DELAY_MS: u64 = 500;

pub const LED_CONNECTING_PULSE_MS: u64 = 500;
pub const LED_RUNNING_PULSE_MS: u64 = 3000;
pub const LED_HEARTBEAT_LIT_MS: u64 = 50;
pub const LED_HEARTBEAT_PAUSE_MS: u64 = 100;
pub const LED_REGISTRATION_ERROR_BLINKS: u8 = 2;
pub const LED_FATAL_ERROR_BLINKS: u8 = 3;
pub const LED_PULSE_LIT_MS: u64 = 100;
pub const LED_ERROR_BLINK_MS: u64 = 200;
pub const LED_ERROR_GAP_MS: u64 = 1000;
