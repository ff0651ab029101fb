// /src/dispatcher.rs
//! SMS command parsing, routing and reply policy.
//!
//! A command reads `SHORTCODE[,PARAM1[,PARAM2]]`. The dispatcher parses it,
//! looks the shortcode up in its handler table, checks the sender's tier
//! against the handler's access level and turns the handler result into
//! notifications.

use heapless::{String, Vec};

use crate::constants::{
    COMMAND_DELIMITER, DENIED_STR, DONE_STR, ERROR_STR, GATE_SHORTCODE_LENGTH, INVALID_FORMAT_STR, MAX_HANDLER_COUNT,
    MAX_PARAM1_LENGTH, MAX_PARAM2_LENGTH, OPEN_SHORTCODE_LENGTH,
};
use crate::custom_strings::{bounded, format_bounded, to_upper};
use crate::error::{ConfigError, FormatError, HandlerError, Message};
use crate::notifications::{NotificationBody, NotificationQueue};
use crate::phone_book::{PhoneNumber, RightsStore, Tier};
use crate::platform::PersistentStore;

pub type Shortcode = String<OPEN_SHORTCODE_LENGTH>;

/// A parsed SMS command.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    pub sender: PhoneNumber,
    /// Upper-cased shortcode.
    pub shortcode: Shortcode,
    pub param1: Option<String<MAX_PARAM1_LENGTH>>,
    pub param2: Option<String<MAX_PARAM2_LENGTH>>,
    /// Text as received, mirrored to the master on failures.
    pub text: Message,
}

impl Command {
    /// Splits `text` into its fields and checks every length bound.
    /// Parameters are trimmed; lengths count bytes.
    pub fn parse(sender: &str, text: &str, max_shortcode_len: usize) -> Result<Self, FormatError> {
        let fields = text.split(COMMAND_DELIMITER).count();
        if !(1..=3).contains(&fields) {
            return Err(FormatError::FieldCount(fields));
        }
        let mut parts = text.split(COMMAND_DELIMITER);

        let code = parts.next().unwrap_or("").trim();
        if code.is_empty() || code.len() > max_shortcode_len {
            return Err(FormatError::ShortcodeLength);
        }
        let shortcode = to_upper(code).ok_or(FormatError::ShortcodeLength)?;

        let param1 = match parts.next() {
            Some(param) => Some(bounded(param.trim()).ok_or(FormatError::Param1Length)?),
            None => None,
        };
        let param2 = match parts.next() {
            Some(param) => Some(bounded(param.trim()).ok_or(FormatError::Param2Length)?),
            None => None,
        };

        Ok(Self {
            sender: format_bounded(format_args!("{}", sender)),
            shortcode,
            param1,
            param2,
            text: format_bounded(format_args!("{}", text)),
        })
    }

    pub fn param1(&self) -> Option<&str> {
        self.param1.as_deref()
    }

    pub fn param2(&self) -> Option<&str> {
        self.param2.as_deref()
    }
}

/// Minimum tier a sender needs before a handler runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    /// Admins and the master.
    Admin,
    /// Any phone listed in the rights store.
    Registered,
    Anyone,
}

impl Access {
    pub fn permits(self, tier: Option<Tier>) -> bool {
        match self {
            Access::Admin => tier >= Some(Tier::Admin),
            Access::Registered => tier.is_some(),
            Access::Anyone => true,
        }
    }
}

/// How a dispatcher reacts to failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DispatchPolicy {
    pub max_shortcode_len: usize,
    /// Failures are mirrored to the master together with the command text.
    pub master_oversight: bool,
}

impl DispatchPolicy {
    /// Gate controller: short codes, every failure reported to the master.
    pub const GATE: DispatchPolicy = DispatchPolicy {
        max_shortcode_len: GATE_SHORTCODE_LENGTH,
        master_oversight: true,
    };

    /// Plain SMS control: long codes, error details go back to the sender.
    pub const OPEN: DispatchPolicy = DispatchPolicy {
        max_shortcode_len: OPEN_SHORTCODE_LENGTH,
        master_oversight: false,
    };
}

/// What a handler may touch.
pub struct HandlerContext<'a> {
    pub rights: &'a mut RightsStore,
    pub queue: &'a mut NotificationQueue,
    pub store: &'a mut dyn PersistentStore,
    /// Set by a handler that wants the device restarted once the reply is
    /// queued.
    pub reboot_requested: bool,
}

impl<'a> HandlerContext<'a> {
    pub fn new(rights: &'a mut RightsStore, queue: &'a mut NotificationQueue, store: &'a mut dyn PersistentStore) -> Self {
        Self {
            rights,
            queue,
            store,
            reboot_requested: false,
        }
    }

    /// Queues a direct reply to the command sender.
    pub fn reply(&mut self, command: &Command, text: &str) {
        self.queue.notify(&command.sender, NotificationBody::literal(format_args!("{}", text)), None);
    }
}

pub type Handler = fn(&mut HandlerContext<'_>, &Command) -> Result<(), HandlerError>;

struct Route {
    shortcode: Shortcode,
    access: Access,
    handler: Handler,
}

/// Result of dispatching one SMS.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchOutcome {
    Done,
    FormatError(FormatError),
    UnknownShortcode,
    Denied,
    BusinessError(Message),
    InternalError(Message),
}

pub struct Dispatcher {
    policy: DispatchPolicy,
    routes: Vec<Route, MAX_HANDLER_COUNT>,
}

impl Dispatcher {
    pub const fn new(policy: DispatchPolicy) -> Self {
        Self {
            policy,
            routes: Vec::new(),
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Adds `handler` under `shortcode`, replacing any handler already
    /// registered for it.
    pub fn register(&mut self, shortcode: &str, access: Access, handler: Handler) -> Result<(), ConfigError> {
        if shortcode.is_empty() || shortcode.len() > self.policy.max_shortcode_len {
            return Err(ConfigError::InvalidValue);
        }
        let shortcode: Shortcode = to_upper(shortcode).ok_or(ConfigError::InvalidValue)?;
        if let Some(route) = self.routes.iter_mut().find(|route| route.shortcode == shortcode) {
            route.access = access;
            route.handler = handler;
            return Ok(());
        }
        self.routes
            .push(Route {
                shortcode,
                access,
                handler,
            })
            .map_err(|_| ConfigError::Capacity)
    }

    pub fn is_registered(&self, shortcode: &str) -> bool {
        self.route(shortcode).is_some()
    }

    fn route(&self, shortcode: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| route.shortcode.as_str().eq_ignore_ascii_case(shortcode))
    }

    /// Runs the command in `text` received from `sender` and queues the
    /// replies. Never fails: every error becomes notifications.
    pub fn dispatch(&self, ctx: &mut HandlerContext<'_>, sender: &str, text: &str) -> DispatchOutcome {
        let command = match Command::parse(sender, text, self.policy.max_shortcode_len) {
            Ok(command) => command,
            Err(err) => {
                warn!("Fail to decode message from {}: {}", sender, err);
                ctx.queue.notify_text(sender, INVALID_FORMAT_STR, None);
                return DispatchOutcome::FormatError(err);
            }
        };

        let Some(route) = self.route(&command.shortcode) else {
            warn!("Invalid {} shortcode from {}", command.shortcode, sender);
            ctx.queue.notify_master(
                ctx.rights,
                NotificationBody::literal(format_args!("Invalid {} shortcode!", command.shortcode)),
                Some(sender),
            );
            ctx.queue.notify_text(sender, ERROR_STR, None);
            return DispatchOutcome::UnknownShortcode;
        };

        if !route.access.permits(ctx.rights.tier_of(sender)) {
            warn!("Unauthorized {} from {}", command.shortcode, sender);
            self.deny(ctx, &command);
            return DispatchOutcome::Denied;
        }

        info!("Running {} for {}", command.shortcode, sender);
        match (route.handler)(ctx, &command) {
            Ok(()) => {
                ctx.reply(&command, DONE_STR);
                DispatchOutcome::Done
            }
            Err(HandlerError::Denied) => {
                warn!("{} denied for {}", command.shortcode, sender);
                self.deny(ctx, &command);
                DispatchOutcome::Denied
            }
            Err(HandlerError::Business(message)) => {
                warn!("{} rejected for {}: {}", command.shortcode, sender, message);
                if self.policy.master_oversight {
                    self.mirror_to_master(ctx, &command, &message);
                }
                ctx.reply(&command, &message);
                DispatchOutcome::BusinessError(message)
            }
            Err(HandlerError::Internal(detail)) => {
                error!("Fail to execute {} from {}: {}", command.shortcode, sender, detail);
                if self.policy.master_oversight {
                    self.mirror_to_master(ctx, &command, &detail);
                } else {
                    ctx.reply(&command, &detail);
                }
                ctx.reply(&command, ERROR_STR);
                DispatchOutcome::InternalError(detail)
            }
        }
    }

    fn deny(&self, ctx: &mut HandlerContext<'_>, command: &Command) {
        ctx.queue.notify_master(
            ctx.rights,
            NotificationBody::literal(format_args!("Denied SMS")),
            Some(&command.sender),
        );
        ctx.reply(command, DENIED_STR);
    }

    fn mirror_to_master(&self, ctx: &mut HandlerContext<'_>, command: &Command, detail: &str) {
        let about = Some(command.sender.as_str());
        ctx.queue
            .notify_master(ctx.rights, NotificationBody::literal(format_args!("Fail! : {}", command.text)), about);
        ctx.queue
            .notify_master(ctx.rights, NotificationBody::literal(format_args!("{}", detail)), about);
    }
}
