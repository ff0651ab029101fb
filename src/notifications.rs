// /src/notifications.rs
//! Outbound SMS queue.
//!
//! The control loop sends at most one queued message per tick. Entries are
//! taken from the back (last in, first out): a reply queued by the latest
//! command leaves before older alarm chatter. Label references (`@key`) are
//! resolved when the entry is sent, so they reflect the parameters at that
//! moment.

use heapless::{String, Vec};

use crate::config::Parameters;
use crate::constants::{LABEL_PREFIX, NO_MSG_STR, NOTIFICATION_QUEUE_DEPTH, SMS_TEXT_LENGTH};
use crate::custom_strings::{bounded, format_bounded};
use crate::error::Message;
use crate::phone_book::{PhoneNumber, RightsStore};
use crate::rights::Right;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotificationBody {
    Literal(Message),
    /// Parameter key whose value is sent.
    Label(crate::config::ParamKey),
}

impl NotificationBody {
    /// `@key` becomes a label reference, anything else a literal.
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix(LABEL_PREFIX).and_then(|key| bounded(key)) {
            Some(key) => NotificationBody::Label(key),
            None => NotificationBody::Literal(format_bounded(format_args!("{}", text))),
        }
    }

    pub fn literal(args: core::fmt::Arguments<'_>) -> Self {
        NotificationBody::Literal(format_bounded(args))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Notification {
    pub to: PhoneNumber,
    pub body: NotificationBody,
    /// Phone that caused the notification, shown to the recipient.
    pub about: Option<PhoneNumber>,
}

/// A message ready for the modem.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Outgoing {
    pub to: PhoneNumber,
    pub text: String<SMS_TEXT_LENGTH>,
}

#[derive(Default)]
pub struct NotificationQueue {
    pending: Vec<Notification, NOTIFICATION_QUEUE_DEPTH>,
}

impl NotificationQueue {
    pub const fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.pending.iter()
    }

    /// Appends one notification. A full queue drops it.
    pub fn push(&mut self, notification: Notification) -> bool {
        match self.pending.push(notification) {
            Ok(()) => true,
            Err(dropped) => {
                warn!("Notification queue full, dropping message to {}", dropped.to);
                false
            }
        }
    }

    /// Queues `body` for a single phone.
    pub fn notify(&mut self, to: &str, body: NotificationBody, about: Option<&str>) {
        let Some(to) = bounded(to) else {
            warn!("Invalid recipient {}", to);
            return;
        };
        self.push(Notification {
            to,
            body,
            about: about.and_then(|origin| bounded(origin)),
        });
    }

    /// Queues `text` for a single phone; `@key` is a label reference.
    pub fn notify_text(&mut self, to: &str, text: &str, about: Option<&str>) {
        self.notify(to, NotificationBody::parse(text), about);
    }

    /// Queues `body` for every phone holding `right`.
    pub fn notify_right(&mut self, rights: &RightsStore, right: Right, body: NotificationBody, about: Option<&str>) {
        for phone in rights.phones_with(right) {
            self.notify(&phone, body.clone(), about);
        }
    }

    /// Queues `body` for the master, if one is configured.
    pub fn notify_master(&mut self, rights: &RightsStore, body: NotificationBody, about: Option<&str>) {
        if let Some(master) = rights.master() {
            self.notify(master, body, about);
        }
    }

    /// Removes the next entry and renders its text against `params`.
    pub fn pop_rendered(&mut self, params: &Parameters) -> Option<Outgoing> {
        let notification = self.pending.pop()?;
        Some(render(notification, params))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn render(notification: Notification, params: &Parameters) -> Outgoing {
    let label = match &notification.body {
        NotificationBody::Literal(text) => text.as_str(),
        NotificationBody::Label(key) => params.text(key, NO_MSG_STR),
    };
    let text = match &notification.about {
        Some(origin) => format_bounded(format_args!("{} : {}", origin, label)),
        None => format_bounded(format_args!("{}", label)),
    };
    Outgoing { to: notification.to, text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rights::RightSet;

    const MASTER: &str = "+32444000001";
    const USER: &str = "+32444000003";

    #[test]
    fn drains_last_in_first_out() {
        let params = Parameters::with_defaults();
        let mut queue = NotificationQueue::new();
        queue.notify_text(USER, "first", None);
        queue.notify_text(USER, "second", None);
        assert_eq!(queue.pop_rendered(&params).unwrap().text.as_str(), "second");
        assert_eq!(queue.pop_rendered(&params).unwrap().text.as_str(), "first");
        assert!(queue.pop_rendered(&params).is_none());
    }

    #[test]
    fn labels_resolve_at_drain_time() {
        let mut params = Parameters::with_defaults();
        let mut queue = NotificationQueue::new();
        queue.notify_text(USER, "@out1-label", Some(MASTER));
        params.set_from_text("out1-label", "Gate open").unwrap();
        let outgoing = queue.pop_rendered(&params).unwrap();
        assert_eq!(outgoing.to.as_str(), USER);
        assert_eq!(outgoing.text.as_str(), "+32444000001 : Gate open");
    }

    #[test]
    fn unknown_label_renders_placeholder() {
        let params = Parameters::with_defaults();
        let mut queue = NotificationQueue::new();
        queue.notify_text(USER, "@nothing", None);
        assert_eq!(queue.pop_rendered(&params).unwrap().text.as_str(), NO_MSG_STR);
    }

    #[test]
    fn full_queue_drops_newest() {
        let mut queue = NotificationQueue::new();
        for _ in 0..NOTIFICATION_QUEUE_DEPTH {
            queue.notify_text(USER, "x", None);
        }
        queue.notify_text(USER, "dropped", None);
        assert_eq!(queue.len(), NOTIFICATION_QUEUE_DEPTH);
        assert!(queue.iter().all(|n| n.body == NotificationBody::parse("x")));
    }

    #[test]
    fn fans_out_to_right_holders() {
        let mut rights = RightsStore::new();
        rights.assign_master(MASTER).unwrap();
        rights.add_user(USER).unwrap();
        rights.grant(USER, Right::NotifyOut1).unwrap();
        let mut queue = NotificationQueue::new();
        queue.notify_right(&rights, Right::NotifyOut1, NotificationBody::parse("@out1-label"), Some(USER));
        assert_eq!(queue.len(), 2);
        queue.notify_right(&rights, Right::AddUser, NotificationBody::parse("au"), None);
        assert_eq!(queue.len(), 3);
        assert_eq!(rights.rights_of(USER), Some(RightSet::parse(":O1:C1:").unwrap()));
    }
}
