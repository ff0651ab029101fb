// /src/config.rs
//! Named configuration parameters (the `main` section of the persisted
//! document).
//!
//! Every key has a fixed kind (text or integer) taken from the default
//! table. Text keys may be unset (`null`). Updates never change a key's kind.

use core::fmt;

use heapless::{LinearMap, String};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{MAX_PARAM_COUNT, PARAM_KEY_LENGTH, PARAM_VALUE_LENGTH};
use crate::custom_strings::{bounded, is_valid_text};
use crate::error::ConfigError;

pub type ParamKey = String<PARAM_KEY_LENGTH>;
pub type ParamText = String<PARAM_VALUE_LENGTH>;

pub const MASTER_KEY: &str = "master";
pub const PASSWORD_KEY: &str = "pswd";
pub const POWERON_LABEL_KEY: &str = "poweron-label";

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamValue {
    Text(ParamText),
    Int(i32),
    Unset,
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ParamValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(text) => f.write_str(text),
            ParamValue::Int(value) => write!(f, "{}", value),
            ParamValue::Unset => f.write_str("None"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamKind {
    Text,
    Int,
}

/// Value restriction applied on top of the kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Domain {
    Free,
    /// Single letter out of the given set, case-insensitive.
    Choice(&'static [&'static str]),
    NonNegative,
}

enum Initial {
    Text(Option<&'static str>),
    Int(i32),
}

struct Definition {
    key: &'static str,
    initial: Initial,
    domain: Domain,
}

const INPUT_MODES: &[&str] = &["H", "L", "D"];
const OUTPUT_MODES: &[&str] = &["P", "T"];
const NOTIFY_TYPES: &[&str] = &["S", "C"];

macro_rules! text {
    ($key:expr, $value:expr) => {
        Definition { key: $key, initial: Initial::Text($value), domain: Domain::Free }
    };
    ($key:expr, $value:expr, $choices:expr) => {
        Definition { key: $key, initial: Initial::Text(Some($value)), domain: Domain::Choice($choices) }
    };
}

macro_rules! int {
    ($key:expr, $value:expr) => {
        Definition { key: $key, initial: Initial::Int($value), domain: Domain::NonNegative }
    };
}

macro_rules! input {
    ($n:literal) => {
        [
            text!(concat!("in", $n, "-label"), Some(concat!("IN", $n, " activated!"))),
            text!(concat!("in", $n, "-mode"), "D", INPUT_MODES),
            int!(concat!("in", $n, "-obs"), 1),
            int!(concat!("in", $n, "-idle"), 2),
            int!(concat!("in", $n, "-irst"), 1),
            text!(concat!("in", $n, "-ntyp"), "S", NOTIFY_TYPES),
        ]
    };
}

macro_rules! output {
    ($n:literal) => {
        [
            text!(concat!("out", $n, "-label"), Some(concat!("OUT", $n, " activated"))),
            text!(concat!("out", $n, "-cmd"), Some(concat!("OUT", $n))),
            text!(concat!("out", $n, "-mode"), "P", OUTPUT_MODES),
            int!(concat!("out", $n, "-sec"), 3),
        ]
    };
}

static GENERAL: [Definition; 3] = [
    text!("master", None),
    text!("pswd", None),
    text!("poweron-label", Some("Starting")),
];
static IN1: [Definition; 6] = input!("1");
static IN2: [Definition; 6] = input!("2");
static IN3: [Definition; 6] = input!("3");
static IN4: [Definition; 6] = input!("4");
static OUT1: [Definition; 4] = output!("1");
static OUT2: [Definition; 4] = output!("2");

static DEFINITIONS: [&[Definition]; 7] = [&GENERAL, &OUT1, &OUT2, &IN1, &IN2, &IN3, &IN4];

fn definitions() -> impl Iterator<Item = &'static Definition> {
    DEFINITIONS.into_iter().flatten()
}

fn definition(key: &str) -> Option<&'static Definition> {
    definitions().find(|definition| definition.key == key)
}

/// Kind of a known key, `None` for names that are not parameters.
pub fn kind_of(key: &str) -> Option<ParamKind> {
    definition(key).map(|definition| match definition.initial {
        Initial::Text(_) => ParamKind::Text,
        Initial::Int(_) => ParamKind::Int,
    })
}

/// Keys that are never listed or edited remotely.
pub fn is_private(key: &str) -> bool {
    key == MASTER_KEY || key == PASSWORD_KEY
}

#[derive(Clone, Debug)]
pub struct Parameters {
    entries: LinearMap<ParamKey, ParamValue, MAX_PARAM_COUNT>,
}

impl Parameters {
    /// Parameters holding every default value.
    pub fn with_defaults() -> Self {
        let mut params = Self { entries: LinearMap::new() };
        params.fill_defaults();
        params
    }

    /// Adds the default value for every key absent from the map.
    pub fn fill_defaults(&mut self) {
        for definition in definitions() {
            if self.get(definition.key).is_some() {
                continue;
            }
            let value = match definition.initial {
                Initial::Text(Some(text)) => bounded(text).map_or(ParamValue::Unset, ParamValue::Text),
                Initial::Text(None) => ParamValue::Unset,
                Initial::Int(value) => ParamValue::Int(value),
            };
            if let Some(key) = bounded(definition.key) {
                let _ = self.entries.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(stored, _)| stored.as_str() == key)
            .map(|(_, value)| value)
    }

    /// Text value of `key`, or `default` when missing, unset or not text.
    pub fn text<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(ParamValue::as_text).unwrap_or(default)
    }

    /// Integer value of `key`, or `default` when missing or not an integer.
    pub fn int(&self, key: &str, default: i32) -> i32 {
        self.get(key).and_then(ParamValue::as_int).unwrap_or(default)
    }

    /// Stores `value` under `key`.
    ///
    /// The key must be known and the value must keep its kind. Text must use
    /// the command character set, enumerated keys accept only their letters
    /// (stored upper-cased) and integers may not be negative.
    pub fn set_value(&mut self, key: &str, value: ParamValue) -> Result<(), ConfigError> {
        let definition = definition(key).ok_or(ConfigError::UnknownParameter)?;
        let value = validate(definition, value)?;
        let key = bounded(key).ok_or(ConfigError::UnknownParameter)?;
        self.entries
            .insert(key, value)
            .map_err(|_| ConfigError::Capacity)?;
        Ok(())
    }

    /// Parses `raw` (as received in an SMS) according to the kind of `key`
    /// and stores it.
    pub fn set_from_text(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let value = match kind_of(key).ok_or(ConfigError::UnknownParameter)? {
            ParamKind::Int => raw.trim().parse::<i32>().map(ParamValue::Int).map_err(|_| ConfigError::TypeMismatch)?,
            ParamKind::Text => ParamValue::Text(bounded(raw).ok_or(ConfigError::InvalidText)?),
        };
        self.set_value(key, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Re-checks every stored value; used after loading a document.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in self.entries.iter() {
            let definition = definition(key).ok_or(ConfigError::UnknownParameter)?;
            validate(definition, value.clone())?;
        }
        Ok(())
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn validate(definition: &Definition, value: ParamValue) -> Result<ParamValue, ConfigError> {
    match (&definition.initial, value) {
        (Initial::Text(_), ParamValue::Unset) if definition.domain == Domain::Free => Ok(ParamValue::Unset),
        (Initial::Text(_), ParamValue::Text(text)) => match definition.domain {
            Domain::Choice(choices) => {
                let upper: Option<ParamText> = crate::custom_strings::to_upper(text.trim());
                match upper {
                    Some(upper) if choices.contains(&upper.as_str()) => Ok(ParamValue::Text(upper)),
                    _ => Err(ConfigError::InvalidValue),
                }
            }
            _ if is_valid_text(&text) => Ok(ParamValue::Text(text)),
            _ => Err(ConfigError::InvalidText),
        },
        (Initial::Int(_), ParamValue::Int(value)) => {
            if definition.domain == Domain::NonNegative && value < 0 {
                Err(ConfigError::InvalidValue)
            } else {
                Ok(ParamValue::Int(value))
            }
        }
        _ => Err(ConfigError::TypeMismatch),
    }
}

struct ValueRef<'a>(&'a ParamValue);

impl Serialize for ValueRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            ParamValue::Text(text) => serializer.serialize_str(text),
            ParamValue::Int(value) => serializer.serialize_i32(*value),
            ParamValue::Unset => serializer.serialize_none(),
        }
    }
}

impl Serialize for Parameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in self.entries.iter() {
            map.serialize_entry(key.as_str(), &ValueRef(value))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Parameters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParametersVisitor;

        impl<'de> Visitor<'de> for ParametersVisitor {
            type Value = Parameters;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameters")
            }

            // The JSON codec has no self-describing mode, so the value type
            // is chosen from the key.
            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Parameters, A::Error> {
                let mut entries = LinearMap::new();
                while let Some(key) = map.next_key::<ParamKey>()? {
                    let value = match kind_of(&key) {
                        Some(ParamKind::Int) => match map.next_value::<Option<i32>>()? {
                            Some(value) => ParamValue::Int(value),
                            None => ParamValue::Unset,
                        },
                        Some(ParamKind::Text) => match map.next_value::<Option<ParamText>>()? {
                            Some(text) => ParamValue::Text(text),
                            None => ParamValue::Unset,
                        },
                        None => return Err(de::Error::custom("unknown parameter")),
                    };
                    entries
                        .insert(key, value)
                        .map_err(|_| de::Error::custom("too many parameters"))?;
                }
                Ok(Parameters { entries })
            }
        }

        deserializer.deserialize_map(ParametersVisitor)
    }
}
