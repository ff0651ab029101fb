// /src/rights.rs
//! Capability tags and the `:TAG:TAG:` sets granted to phone numbers.

use core::fmt::{self, Write};

use heapless::String;

use crate::constants::MAX_PARAM2_LENGTH;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Longest rendering of a set: every tag, colon-bounded.
pub const RIGHTS_STRING_LENGTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Right {
    AddUser,
    NotifyIn1,
    NotifyIn2,
    NotifyIn3,
    NotifyIn4,
    NotifyOut1,
    NotifyOut2,
    CanOut1,
    CanOut2,
}

impl Right {
    pub const ALL: [Right; 9] = [
        Right::AddUser,
        Right::NotifyIn1,
        Right::NotifyIn2,
        Right::NotifyIn3,
        Right::NotifyIn4,
        Right::NotifyOut1,
        Right::NotifyOut2,
        Right::CanOut1,
        Right::CanOut2,
    ];

    /// Short form used in SMS commands and in the persisted document.
    pub const fn code(self) -> &'static str {
        match self {
            Right::AddUser => "AU",
            Right::NotifyIn1 => "I1",
            Right::NotifyIn2 => "I2",
            Right::NotifyIn3 => "I3",
            Right::NotifyIn4 => "I4",
            Right::NotifyOut1 => "O1",
            Right::NotifyOut2 => "O2",
            Right::CanOut1 => "C1",
            Right::CanOut2 => "C2",
        }
    }

    /// Accepts the short code case-insensitively.
    pub fn from_code(code: &str) -> Option<Right> {
        Right::ALL
            .into_iter()
            .find(|right| right.code().eq_ignore_ascii_case(code.trim()))
    }

    /// Only a holder may grant it to or revoke it from someone else.
    pub const fn is_restricted(self) -> bool {
        matches!(self, Right::AddUser)
    }

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// A set of [`Right`]s. Rendered as a colon-delimited, colon-bounded list
/// (`:AU:C1:`), the empty set as `:`.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct RightSet(u16);

impl RightSet {
    pub const EMPTY: RightSet = RightSet(0);
    pub const ALL: RightSet = RightSet((1 << Right::ALL.len()) - 1);

    pub const MASTER_DEFAULT: RightSet = RightSet::ALL;
    pub const ADMIN_DEFAULT: RightSet = RightSet(RightSet::ALL.0 & !Right::AddUser.bit());
    pub const USER_DEFAULT: RightSet = RightSet(Right::CanOut1.bit());

    pub const fn contains(self, right: Right) -> bool {
        self.0 & right.bit() != 0
    }

    pub fn insert(&mut self, right: Right) {
        self.0 |= right.bit();
    }

    pub fn remove(&mut self, right: Right) {
        self.0 &= !right.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Right> {
        Right::ALL.into_iter().filter(move |right| self.contains(*right))
    }

    /// Parses `:AU:C1:`. Leading/trailing colons are optional and empty
    /// segments are ignored.
    pub fn parse(text: &str) -> Option<RightSet> {
        Self::parse_separated(text, ':')
    }

    /// Parses a space separated tag list as typed in SMS commands (`C2 O1`).
    pub fn parse_list(text: &str) -> Result<RightSet, InvalidRight> {
        let mut set = RightSet::EMPTY;
        for code in text.split(' ').filter(|code| !code.is_empty()) {
            match Right::from_code(code) {
                Some(right) => set.insert(right),
                None => return Err(InvalidRight(crate::custom_strings::format_bounded(format_args!("{}", code)))),
            }
        }
        Ok(set)
    }

    fn parse_separated(text: &str, separator: char) -> Option<RightSet> {
        let mut set = RightSet::EMPTY;
        for code in text.split(separator).filter(|code| !code.trim().is_empty()) {
            set.insert(Right::from_code(code)?);
        }
        Some(set)
    }

    pub fn render(self) -> String<RIGHTS_STRING_LENGTH> {
        let mut out = String::new();
        let _ = write!(out, "{}", self);
        out
    }

    /// Tags separated by spaces, as shown in replies (colons confuse some
    /// phone SMS apps).
    pub fn to_spaced(self) -> String<RIGHTS_STRING_LENGTH> {
        let mut out = String::new();
        for (idx, right) in self.iter().enumerate() {
            if idx > 0 {
                let _ = out.push(' ');
            }
            let _ = out.push_str(right.code());
        }
        out
    }
}

/// Tag text that names no known right.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidRight(pub String<MAX_PARAM2_LENGTH>);

impl fmt::Display for RightSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char(':')?;
        for right in self.iter() {
            f.write_str(right.code())?;
            f.write_char(':')?;
        }
        Ok(())
    }
}

impl fmt::Debug for RightSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for RightSet {
    fn format(&self, f: defmt::Formatter<'_>) {
        let text = self.render();
        defmt::write!(f, "{=str}", text.as_str());
    }
}

impl Serialize for RightSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.render().as_str())
    }
}

impl<'de> Deserialize<'de> for RightSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RightSetVisitor;

        impl Visitor<'_> for RightSetVisitor {
            type Value = RightSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a colon delimited list of rights")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<RightSet, E> {
                RightSet::parse(value).ok_or_else(|| E::custom("unknown right"))
            }
        }

        deserializer.deserialize_str(RightSetVisitor)
    }
}
