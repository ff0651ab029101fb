// /src/sim800.rs
//! SIM800 driver over USART2.
//!
//! Commands are written from the control loop; [`rx_runner`] reads every
//! byte, completes the pending command through `RESPONSE_SIGNAL` and turns
//! unsolicited lines (`+CLIP`, `+CMTI`) into [`ModemEvent`]s.

use core::fmt::Write;
use core::str::from_utf8;

use embassy_stm32::mode::Async;
use embassy_stm32::usart::{UartRx, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_io_async::Read;
use heapless::{String, Vec};
use defmt::{debug, error, info, warn};

use gate800c::custom_strings::bounded;
use gate800c::error::{Message, ModemError};
use gate800c::phone_book::PhoneNumber;
use gate800c::platform::{ModemChannel, ModemEvent, SmsId, SmsMessage};

use crate::hardware::Sim800Control;

pub const SIM800_LINE_BUFFER_SIZE: usize = 192;
const MAX_REPLY_LINES: usize = 4;
const EVENT_QUEUE_DEPTH: usize = 8;
const COMMAND_TIMEOUT_MS: u64 = 1000;
const SMS_TIMEOUT_MS: u64 = 10_000;
/// `+CLIP` repeats with every ring of the same call.
const CLIP_REPEAT_WINDOW: Duration = Duration::from_secs(6);
const CTRL_Z: u8 = 0x1A;

type Line = String<SIM800_LINE_BUFFER_SIZE>;

enum CommandResult {
    /// Final `OK` with the information lines received before it.
    Ok(Vec<Line, MAX_REPLY_LINES>),
    Error,
    /// The `>` character asking for the SMS body.
    Prompt,
}

// Used to notify the command-sender that a response arrived
static RESPONSE_SIGNAL: Signal<CriticalSectionRawMutex, CommandResult> = Signal::new();
static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, ModemEvent, EVENT_QUEUE_DEPTH> = Channel::new();

pub struct Sim800 {
    tx: UartTx<'static, Async>,
    control: Sim800Control,
}

impl Sim800 {
    pub fn new(tx: UartTx<'static, Async>, control: Sim800Control) -> Self {
        Self { tx, control }
    }

    /// Powers the module and leaves it time to boot.
    pub async fn power_up(&mut self) {
        info!("Powering SIM800...");
        self.control.sim800_ttl.set_high();
        self.control.sim800_enable.set_high();
        Timer::after_secs(3).await;
    }

    pub async fn init(&mut self) -> Result<(), ModemError> {
        info!("Initializing SIM800...");
        self.send_cmd_wait("AT\r\n", COMMAND_TIMEOUT_MS).await?;
        // Disable Echo
        self.send_cmd_wait("ATE0\r\n", COMMAND_TIMEOUT_MS).await?;
        // Full Error Messages
        self.send_cmd_wait("AT+CMEE=1\r\n", COMMAND_TIMEOUT_MS).await?;
        // Caller ID
        self.send_cmd_wait("AT+CLIP=1\r\n", COMMAND_TIMEOUT_MS).await?;
        // SMS Text Mode
        self.send_cmd_wait("AT+CMGF=1\r\n", COMMAND_TIMEOUT_MS).await?;
        // Store new SMS on the SIM, notify with +CMTI
        self.send_cmd_wait("AT+CNMI=2,1,0,0,0\r\n", COMMAND_TIMEOUT_MS).await?;
        info!("SIM800 Init Complete");
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ModemError> {
        self.tx.write(bytes).await.map_err(|_| ModemError::Transport)
    }

    async fn exchange(&mut self, cmd: &str, timeout_ms: u64) -> Result<CommandResult, ModemError> {
        RESPONSE_SIGNAL.reset();
        debug!("TX: {}", cmd.trim());
        self.write(cmd.as_bytes()).await?;
        with_timeout(Duration::from_millis(timeout_ms), RESPONSE_SIGNAL.wait())
            .await
            .map_err(|_| ModemError::Timeout)
    }

    /// Sends `cmd` and waits for `OK`, returning the information lines.
    async fn send_cmd_wait(&mut self, cmd: &str, timeout_ms: u64) -> Result<Vec<Line, MAX_REPLY_LINES>, ModemError> {
        match self.exchange(cmd, timeout_ms).await? {
            CommandResult::Ok(lines) => Ok(lines),
            CommandResult::Error => {
                warn!("{} rejected", cmd.trim());
                Err(ModemError::Rejected)
            }
            CommandResult::Prompt => Err(ModemError::Malformed),
        }
    }
}

impl ModemChannel for Sim800 {
    async fn is_registered(&mut self) -> Result<bool, ModemError> {
        let lines = self.send_cmd_wait("AT+CREG?\r\n", COMMAND_TIMEOUT_MS).await?;
        // +CREG: <n>,<stat>; 1 is home network, 5 is roaming
        let line = lines
            .iter()
            .find(|line| line.starts_with("+CREG:"))
            .ok_or(ModemError::Malformed)?;
        let stat = line.rsplit(',').next().map(str::trim).ok_or(ModemError::Malformed)?;
        Ok(matches!(stat, "1" | "5"))
    }

    async fn send(&mut self, phone: &str, text: &str) -> Result<(), ModemError> {
        info!("Sending SMS to {}", phone);

        // 1. Send CMGS command
        let mut cmd: String<64> = String::new();
        let _ = write!(cmd, "AT+CMGS=\"{}\"\r\n", phone);

        // 2. Expect '>' prompt
        match self.exchange(&cmd, 5000).await? {
            CommandResult::Prompt => {}
            CommandResult::Error => return Err(ModemError::Rejected),
            CommandResult::Ok(_) => {
                error!("Failed to get SMS prompt >");
                return Err(ModemError::Malformed);
            }
        }

        // 3. Send Body + Ctrl-Z
        RESPONSE_SIGNAL.reset();
        self.write(text.as_bytes()).await?;
        self.write(&[CTRL_Z]).await?;

        // 4. Wait for final OK (can take seconds)
        match with_timeout(Duration::from_millis(SMS_TIMEOUT_MS), RESPONSE_SIGNAL.wait()).await {
            Ok(CommandResult::Ok(_)) => {
                info!("SMS Sent Successfully");
                Ok(())
            }
            Ok(_) => {
                error!("SMS Send Failed");
                Err(ModemError::Rejected)
            }
            Err(_) => Err(ModemError::Timeout),
        }
    }

    fn poll_event(&mut self) -> Option<ModemEvent> {
        EVENT_CHANNEL.try_receive().ok()
    }

    async fn read_sms(&mut self, id: SmsId) -> Result<SmsMessage, ModemError> {
        let mut cmd: String<32> = String::new();
        let _ = write!(cmd, "AT+CMGR={}\r\n", id);
        let lines = self.send_cmd_wait(&cmd, SMS_TIMEOUT_MS).await?;

        // +CMGR: "REC UNREAD","+32444000001","","24/01/01,12:00:00+04"
        // followed by the body lines
        let header = lines
            .iter()
            .position(|line| line.starts_with("+CMGR:"))
            .ok_or(ModemError::Malformed)?;
        let sender: PhoneNumber = parse_quoted(&lines[header], 1);
        if sender.is_empty() {
            return Err(ModemError::Malformed);
        }

        let mut text: Message = String::new();
        for (n, line) in lines[header + 1..].iter().enumerate() {
            if n > 0 {
                let _ = text.push('\n');
            }
            for c in line.chars() {
                if text.push(c).is_err() {
                    break;
                }
            }
        }
        Ok(SmsMessage { sender, text })
    }

    async fn delete_sms(&mut self, id: SmsId) -> Result<(), ModemError> {
        let mut cmd: String<32> = String::new();
        let _ = write!(cmd, "AT+CMGD={}\r\n", id);
        self.send_cmd_wait(&cmd, SMS_TIMEOUT_MS).await.map(|_| ())
    }

    async fn delete_all_sms(&mut self) -> Result<(), ModemError> {
        self.send_cmd_wait("AT+CMGDA=\"DEL ALL\"\r\n", SMS_TIMEOUT_MS).await.map(|_| ())
    }

    async fn answer_call(&mut self) -> Result<(), ModemError> {
        self.send_cmd_wait("ATA\r\n", COMMAND_TIMEOUT_MS).await.map(|_| ())
    }

    async fn hang_up(&mut self) -> Result<(), ModemError> {
        self.send_cmd_wait("AT+CHUP\r\n", COMMAND_TIMEOUT_MS).await.map(|_| ())
    }

    async fn dial(&mut self, phone: &str) -> Result<(), ModemError> {
        info!("Calling {}", phone);
        let mut cmd: String<64> = String::new();
        let _ = write!(cmd, "ATD{};\r\n", phone);
        // ATD returns OK as soon as the call is placed.
        self.send_cmd_wait(&cmd, COMMAND_TIMEOUT_MS).await.map(|_| ())
    }
}

// --- The Background Reader Task ---

// Consumes the Rx part of the UART and parses every incoming byte.
// 1. Final results (OK, ERROR, >) -> Signal the command sender
// 2. Events (+CLIP, +CMTI) -> Push to the event channel
// 3. Anything else is kept as an information line of the pending command
pub async fn rx_runner(rx: UartRx<'static, Async>) {
    let mut dma_buf = [0u8; 512];
    let mut ring = rx.into_ring_buffered(&mut dma_buf);

    let mut line_buf = [0u8; SIM800_LINE_BUFFER_SIZE];
    let mut pos = 0;
    let mut pending: Vec<Line, MAX_REPLY_LINES> = Vec::new();
    let mut last_caller: Option<(PhoneNumber, Instant)> = None;
    // Set between a +CMGR: header and the empty line closing the SMS body.
    let mut in_body = false;

    loop {
        let mut byte_buf = [0u8; 1];
        if ring.read(&mut byte_buf).await.is_err() {
            continue;
        }
        let b = byte_buf[0];

        // The SMS prompt comes without a newline.
        if b == b'>' && pos == 0 {
            RESPONSE_SIGNAL.signal(CommandResult::Prompt);
            continue;
        }

        if b != b'\n' {
            if pos < SIM800_LINE_BUFFER_SIZE {
                line_buf[pos] = b;
                pos += 1;
            } else {
                warn!("RX line overflow");
                pos = 0;
            }
            continue;
        }

        let len = pos;
        pos = 0;
        let Ok(line) = from_utf8(&line_buf[..len]) else {
            continue;
        };
        let clean = line.trim();
        if clean.is_empty() {
            in_body = false;
            continue;
        }
        debug!("RX: {}", clean);

        // Body text is never a result code, even when it reads "OK".
        if in_body {
            push_pending(&mut pending, clean);
            continue;
        }

        if clean.starts_with("+CMGR:") {
            push_pending(&mut pending, clean);
            in_body = true;
        } else if clean == "OK" {
            RESPONSE_SIGNAL.signal(CommandResult::Ok(core::mem::take(&mut pending)));
        } else if clean == "ERROR" || clean.starts_with("+CME ERROR") || clean.starts_with("+CMS ERROR") {
            pending.clear();
            RESPONSE_SIGNAL.signal(CommandResult::Error);
        } else if clean == "RING" {
            // The number follows in +CLIP
        } else if clean.starts_with("+CLIP:") {
            let phone: PhoneNumber = parse_quoted(clean, 0);
            if phone.is_empty() {
                continue;
            }
            let now = Instant::now();
            let repeated = matches!(
                &last_caller,
                Some((previous, at)) if *previous == phone && now.saturating_duration_since(*at) < CLIP_REPEAT_WINDOW
            );
            last_caller = Some((phone.clone(), now));
            if !repeated && EVENT_CHANNEL.try_send(ModemEvent::IncomingCall(phone)).is_err() {
                warn!("Event queue full, call dropped");
            }
        } else if clean.starts_with("NO CARRIER") {
            last_caller = None;
        } else if clean.starts_with("+CMTI:") {
            // +CMTI: "SM",3
            match clean.rsplit(',').next().and_then(|id| id.trim().parse::<SmsId>().ok()) {
                Some(id) => {
                    if EVENT_CHANNEL.try_send(ModemEvent::SmsReceived(id)).is_err() {
                        warn!("Event queue full, SMS {} left in storage", id);
                    }
                }
                None => warn!("Unreadable +CMTI: {}", clean),
            }
        } else {
            push_pending(&mut pending, clean);
        }
    }
}

fn push_pending(pending: &mut Vec<Line, MAX_REPLY_LINES>, line: &str) {
    let Some(line) = bounded::<SIM800_LINE_BUFFER_SIZE>(line) else {
        return;
    };
    if let Err(line) = pending.push(line) {
        warn!("Reply longer than {} lines, dropped: {}", MAX_REPLY_LINES, line.as_str());
    }
}

// --- Helpers ---

// Extracts the string between quotes.
// `target_idx` indicates which quoted pair to extract (0 for first, 1 for second...)
fn parse_quoted<const N: usize>(input: &str, target_idx: usize) -> String<N> {
    let mut result = String::new();
    for c in input.split('"').skip(1).step_by(2).nth(target_idx).unwrap_or("").chars() {
        if result.push(c).is_err() {
            break;
        }
    }
    result
}
