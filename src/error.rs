// /src/error.rs
use heapless::String;

use crate::constants::SMS_TEXT_LENGTH;

pub type Message = String<SMS_TEXT_LENGTH>;

/// Malformed command text. The sender gets a single "Invalid format!" reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatError {
    #[error("invalid {0} count of parameters")]
    FieldCount(usize),
    #[error("invalid shortcode length")]
    ShortcodeLength,
    #[error("invalid param1 length")]
    Param1Length,
    #[error("invalid param2 length")]
    Param2Length,
}

/// Invalid parameter value or persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("unknown parameter")]
    UnknownParameter,
    #[error("value type differs from the stored one")]
    TypeMismatch,
    #[error("text uses characters outside the allowed set")]
    InvalidText,
    #[error("value out of range")]
    InvalidValue,
    #[error("configuration capacity exhausted")]
    Capacity,
    #[error("malformed configuration document")]
    Malformed,
    #[error("unsupported configuration version {0}")]
    Version(u32),
    #[error("phone number listed in more than one tier")]
    DuplicatePhone,
    #[error("storage failure")]
    Storage(#[from] StoreError),
}

/// Failures of the rights store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RightsError {
    #[error("phone number not registered")]
    UnknownPhone,
    #[error("phone number already registered")]
    AlreadyRegistered,
    #[error("invalid phone number")]
    InvalidPhone,
    #[error("phone book full")]
    Capacity,
    #[error("master cannot be deleted")]
    MasterDeletion,
    #[error("denied")]
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemError {
    #[error("serial link failure")]
    Transport,
    #[error("modem did not answer in time")]
    Timeout,
    #[error("modem returned an error")]
    Rejected,
    #[error("unexpected modem response")]
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    #[error("storage read failed")]
    Read,
    #[error("storage write failed")]
    Write,
    #[error("document too large for storage")]
    TooLarge,
}

/// Error raised by a command handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandlerError {
    /// The sender may not perform this action.
    #[error("Denied!")]
    Denied,
    /// Expected rejection; the message goes back to the sender verbatim.
    #[error("{0}")]
    Business(Message),
    /// Unexpected failure; the detail only goes to diagnostics.
    #[error("{0}")]
    Internal(Message),
}

impl HandlerError {
    pub fn business(args: core::fmt::Arguments<'_>) -> Self {
        HandlerError::Business(crate::custom_strings::format_bounded(args))
    }

    pub fn internal(args: core::fmt::Arguments<'_>) -> Self {
        HandlerError::Internal(crate::custom_strings::format_bounded(args))
    }
}

impl From<RightsError> for HandlerError {
    fn from(err: RightsError) -> Self {
        match err {
            RightsError::Denied => HandlerError::Denied,
            RightsError::MasterDeletion => HandlerError::business(format_args!("Cannot delete Master!")),
            RightsError::AlreadyRegistered => HandlerError::business(format_args!("Already registered!")),
            RightsError::InvalidPhone => HandlerError::business(format_args!("Invalid phone Number!")),
            RightsError::UnknownPhone => HandlerError::business(format_args!("{}", crate::constants::NO_USER_STR)),
            RightsError::Capacity => HandlerError::business(format_args!("Phone book full!")),
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        HandlerError::internal(format_args!("{}", err))
    }
}

impl From<ConfigError> for HandlerError {
    fn from(err: ConfigError) -> Self {
        HandlerError::internal(format_args!("{}", err))
    }
}

/// Errors that end the control loop. The device then shows the error
/// pattern and stops processing commands until it is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("modem error: {0}")]
    Modem(#[from] ModemError),
    #[error("network registration timed out")]
    RegistrationTimeout,
}
