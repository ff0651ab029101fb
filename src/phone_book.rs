// /src/phone_book.rs
//! Rights store: who may do what.
//!
//! Three tiers share one document: the master (the `master` parameter, who
//! implicitly holds every right), the admins and the users. A phone number is
//! listed in at most one of the admin/user books. The master is normally also
//! enumerated in the admin book, which is where its notification tags live.

use heapless::{LinearMap, String, Vec};
use serde::{Deserialize, Serialize};

use crate::config::{MASTER_KEY, Parameters};
use crate::constants::{CONFIG_BUFFER_SIZE, CONFIG_VERSION, MAX_ADMIN_COUNT, MAX_PHONE_COUNT, MAX_PHONE_LENGTH, MAX_USER_COUNT};
use crate::custom_strings::{bounded, is_phone_number};
use crate::error::{ConfigError, RightsError, StoreError};
use crate::platform::PersistentStore;
use crate::rights::{Right, RightSet};

pub type PhoneNumber = String<MAX_PHONE_LENGTH>;

/// Parses a phone number received from the modem or typed in a command.
pub fn phone_number(value: &str) -> Result<PhoneNumber, RightsError> {
    let value = value.trim();
    if !is_phone_number(value) {
        return Err(RightsError::InvalidPhone);
    }
    bounded(value).ok_or(RightsError::InvalidPhone)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tier {
    User,
    Admin,
    Master,
}

/// Phone number → rights book of one tier.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneBook<const N: usize> {
    phones: LinearMap<PhoneNumber, RightSet, N>,
}

impl<const N: usize> PhoneBook<N> {
    pub fn new() -> Self {
        Self { phones: LinearMap::new() }
    }

    pub fn add_number(&mut self, number: &str, rights: RightSet) -> Result<(), RightsError> {
        info!("Trying to add number {}", number);
        if self.contains(number) {
            return Err(RightsError::AlreadyRegistered);
        }
        let phone = phone_number(number)?;
        self.phones
            .insert(phone, rights)
            .map_err(|_| RightsError::Capacity)?;
        Ok(())
    }

    pub fn remove_number(&mut self, number: &str) -> Option<RightSet> {
        let phone: PhoneNumber = bounded(number)?;
        self.phones.remove(&phone)
    }

    pub fn get(&self, number: &str) -> Option<RightSet> {
        self.phones
            .iter()
            .find(|(phone, _)| phone.as_str() == number)
            .map(|(_, rights)| *rights)
    }

    fn get_mut(&mut self, number: &str) -> Option<&mut RightSet> {
        self.phones
            .iter_mut()
            .find(|(phone, _)| phone.as_str() == number)
            .map(|(_, rights)| rights)
    }

    pub fn contains(&self, number: &str) -> bool {
        self.get(number).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, RightSet)> {
        self.phones.iter().map(|(phone, rights)| (phone.as_str(), *rights))
    }

    pub fn len(&self) -> usize {
        self.phones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phones.is_empty()
    }
}

/// The persisted document: parameters plus the admin and user books.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RightsStore {
    version: u32,
    main: Parameters,
    admins: PhoneBook<MAX_ADMIN_COUNT>,
    users: PhoneBook<MAX_USER_COUNT>,
}

impl Default for RightsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RightsStore {
    /// Factory document: default parameters, nobody registered.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            main: Parameters::with_defaults(),
            admins: PhoneBook::new(),
            users: PhoneBook::new(),
        }
    }

    /// Loads the saved document, or the factory one when nothing is saved.
    pub fn load(store: &mut dyn PersistentStore) -> Result<Self, ConfigError> {
        if !store.exists() {
            info!("No saved configuration, using defaults");
            return Ok(Self::new());
        }
        let mut buf = [0u8; CONFIG_BUFFER_SIZE];
        let len = store.load(&mut buf)?;
        let (mut document, _) = serde_json_core::from_slice::<RightsStore>(&buf[..len]).map_err(|_| {
            error!("Saved configuration is not a valid document");
            ConfigError::Malformed
        })?;
        document.upgrade()?;
        info!("Configuration loaded: {} admins, {} users", document.admins.len(), document.users.len());
        Ok(document)
    }

    /// Writes the document to `store`.
    pub fn save(&self, store: &mut dyn PersistentStore) -> Result<(), StoreError> {
        let mut buf = [0u8; CONFIG_BUFFER_SIZE];
        let len = serde_json_core::to_slice(self, &mut buf).map_err(|_| StoreError::TooLarge)?;
        store.save(&buf[..len])?;
        info!("Configuration saved ({} bytes)", len);
        Ok(())
    }

    /// Brings a freshly loaded document up to date and checks it.
    pub fn upgrade(&mut self) -> Result<(), ConfigError> {
        if self.version > CONFIG_VERSION {
            return Err(ConfigError::Version(self.version));
        }
        self.version = CONFIG_VERSION;
        self.main.fill_defaults();
        self.main.validate()?;
        if self.admins.iter().any(|(phone, _)| self.users.contains(phone)) {
            return Err(ConfigError::DuplicatePhone);
        }
        Ok(())
    }

    pub fn params(&self) -> &Parameters {
        &self.main
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.main
    }

    pub fn admins(&self) -> &PhoneBook<MAX_ADMIN_COUNT> {
        &self.admins
    }

    pub fn users(&self) -> &PhoneBook<MAX_USER_COUNT> {
        &self.users
    }

    pub fn master(&self) -> Option<&str> {
        self.main.get(MASTER_KEY).and_then(|value| value.as_text())
    }

    pub fn is_master(&self, phone: &str) -> bool {
        self.master() == Some(phone)
    }

    /// Makes `phone` the master and enumerates it in the admin book with the
    /// master's default rights. Refused once a master exists.
    pub fn assign_master(&mut self, phone: &str) -> Result<(), RightsError> {
        if self.master().is_some() {
            return Err(RightsError::Denied);
        }
        let phone = phone_number(phone)?;
        self.users.remove_number(&phone);
        self.admins.remove_number(&phone);
        self.admins.add_number(&phone, RightSet::MASTER_DEFAULT)?;
        let value = crate::config::ParamValue::Text(bounded(&phone).ok_or(RightsError::InvalidPhone)?);
        self.main
            .set_value(MASTER_KEY, value)
            .map_err(|_| RightsError::InvalidPhone)
    }

    pub fn tier_of(&self, phone: &str) -> Option<Tier> {
        if self.is_master(phone) {
            Some(Tier::Master)
        } else if self.admins.contains(phone) {
            Some(Tier::Admin)
        } else if self.users.contains(phone) {
            Some(Tier::User)
        } else {
            None
        }
    }

    /// Effective rights. The master holds every right whether enumerated or
    /// not.
    pub fn rights_of(&self, phone: &str) -> Option<RightSet> {
        if self.is_master(phone) {
            return Some(RightSet::ALL);
        }
        self.enumerated_rights(phone)
    }

    /// Rights as stored in the books, without the master's implicit ones.
    pub fn enumerated_rights(&self, phone: &str) -> Option<RightSet> {
        self.admins.get(phone).or_else(|| self.users.get(phone))
    }

    pub fn has_right(&self, phone: &str, right: Right) -> bool {
        self.rights_of(phone).is_some_and(|rights| rights.contains(right))
    }

    fn stored_rights_mut(&mut self, phone: &str) -> Option<&mut RightSet> {
        if self.admins.contains(phone) {
            self.admins.get_mut(phone)
        } else {
            self.users.get_mut(phone)
        }
    }

    /// Adds `right` to an enumerated phone. Granting a held right is a no-op.
    pub fn grant(&mut self, phone: &str, right: Right) -> Result<(), RightsError> {
        let rights = self.stored_rights_mut(phone).ok_or(RightsError::UnknownPhone)?;
        rights.insert(right);
        Ok(())
    }

    /// Removes `right` from an enumerated phone. Revoking an absent right is a
    /// no-op.
    pub fn revoke(&mut self, phone: &str, right: Right) -> Result<(), RightsError> {
        let rights = self.stored_rights_mut(phone).ok_or(RightsError::UnknownPhone)?;
        rights.remove(right);
        Ok(())
    }

    /// Enumerated phones (admins first, then users) holding `right`. The
    /// master only appears when enumerated with that right.
    pub fn phones_with(&self, right: Right) -> Vec<PhoneNumber, MAX_PHONE_COUNT> {
        let mut phones = Vec::new();
        let holders = self
            .admins
            .iter()
            .chain(self.users.iter())
            .filter(|(_, rights)| rights.contains(right));
        for (phone, _) in holders {
            if let Some(phone) = bounded(phone) {
                let _ = phones.push(phone);
            }
        }
        phones
    }

    /// Checks whether `actor` may change `target`'s rights by `changes`.
    ///
    /// Only the master may touch the master or an admin. Admins may change
    /// users, but restricted rights only move between holders.
    pub fn authorize_modification(&self, actor: &str, target: &str, changes: RightSet) -> Result<(), RightsError> {
        let actor_tier = self.tier_of(actor).ok_or(RightsError::Denied)?;
        let target_tier = self.tier_of(target).ok_or(RightsError::UnknownPhone)?;

        match target_tier {
            Tier::Master | Tier::Admin if actor_tier != Tier::Master => return Err(RightsError::Denied),
            Tier::User if actor_tier < Tier::Admin => return Err(RightsError::Denied),
            _ => {}
        }

        let actor_rights = self.rights_of(actor).unwrap_or(RightSet::EMPTY);
        for restricted in changes.iter().filter(|right| right.is_restricted()) {
            if !actor_rights.contains(restricted) {
                warn!("{} does not own restricted right {}", actor, restricted);
                return Err(RightsError::Denied);
            }
        }
        Ok(())
    }

    /// Registers a new user with the default user rights.
    pub fn add_user(&mut self, phone: &str) -> Result<(), RightsError> {
        if self.tier_of(phone).is_some() {
            return Err(RightsError::AlreadyRegistered);
        }
        self.users.add_number(phone, RightSet::USER_DEFAULT)
    }

    /// Removes a user or an admin. The master can never be deleted and only
    /// the master may delete an admin.
    pub fn delete(&mut self, actor: &str, phone: &str) -> Result<(), RightsError> {
        match self.tier_of(phone) {
            Some(Tier::Master) => Err(RightsError::MasterDeletion),
            Some(Tier::Admin) if !self.is_master(actor) => Err(RightsError::Denied),
            Some(Tier::Admin) => {
                self.admins.remove_number(phone);
                Ok(())
            }
            Some(Tier::User) => {
                self.users.remove_number(phone);
                Ok(())
            }
            None => Err(RightsError::UnknownPhone),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "+32444000001";
    const ADMIN: &str = "+32444000002";
    const USER: &str = "+32444000003";
    const OTHER: &str = "+32444000004";

    fn store() -> RightsStore {
        let mut store = RightsStore::new();
        store.assign_master(MASTER).unwrap();
        store.admins.add_number(ADMIN, RightSet::ADMIN_DEFAULT).unwrap();
        store.add_user(USER).unwrap();
        store
    }

    #[test]
    fn phone_book_rejects_duplicates_and_garbage() {
        let mut book: PhoneBook<2> = PhoneBook::new();
        book.add_number("+3212", RightSet::USER_DEFAULT).unwrap();
        assert_eq!(book.add_number("+3212", RightSet::USER_DEFAULT), Err(RightsError::AlreadyRegistered));
        assert_eq!(book.add_number("3213", RightSet::USER_DEFAULT), Err(RightsError::InvalidPhone));
        book.add_number("+3213", RightSet::USER_DEFAULT).unwrap();
        assert_eq!(book.add_number("+3214", RightSet::USER_DEFAULT), Err(RightsError::Capacity));
    }

    #[test]
    fn master_has_every_right() {
        let mut store = store();
        store.revoke(MASTER, Right::CanOut2).unwrap();
        assert_eq!(store.rights_of(MASTER), Some(RightSet::ALL));
        assert!(!store.enumerated_rights(MASTER).unwrap().contains(Right::CanOut2));
        assert_eq!(store.tier_of(MASTER), Some(Tier::Master));
        assert_eq!(store.tier_of(ADMIN), Some(Tier::Admin));
        assert_eq!(store.tier_of(USER), Some(Tier::User));
        assert_eq!(store.tier_of(OTHER), None);
    }

    #[test]
    fn master_is_assigned_once() {
        let mut store = store();
        assert_eq!(store.assign_master(OTHER), Err(RightsError::Denied));
        assert_eq!(store.master(), Some(MASTER));
    }

    #[test]
    fn grant_and_revoke_are_idempotent() {
        let mut store = store();
        store.grant(USER, Right::CanOut2).unwrap();
        store.grant(USER, Right::CanOut2).unwrap();
        assert_eq!(store.rights_of(USER).unwrap().render().as_str(), ":C1:C2:");
        store.revoke(USER, Right::AddUser).unwrap();
        assert_eq!(store.rights_of(USER).unwrap().render().as_str(), ":C1:C2:");
        assert_eq!(store.grant(OTHER, Right::CanOut1), Err(RightsError::UnknownPhone));
    }

    #[test]
    fn phones_with_lists_each_holder_once() {
        let mut store = store();
        store.grant(USER, Right::NotifyOut1).unwrap();
        let holders = store.phones_with(Right::NotifyOut1);
        assert_eq!(holders.len(), 3);
        for phone in [MASTER, ADMIN, USER] {
            assert_eq!(holders.iter().filter(|p| p.as_str() == phone).count(), 1);
        }
        store.revoke(MASTER, Right::NotifyOut1).unwrap();
        assert!(!store.phones_with(Right::NotifyOut1).iter().any(|p| p.as_str() == MASTER));
        assert!(store.phones_with(Right::AddUser).iter().all(|p| p.as_str() == MASTER));
    }

    #[test]
    fn only_master_modifies_master_and_admins() {
        let store = store();
        let c2 = RightSet::parse(":C2:").unwrap();
        assert_eq!(store.authorize_modification(ADMIN, MASTER, c2), Err(RightsError::Denied));
        assert_eq!(store.authorize_modification(ADMIN, ADMIN, c2), Err(RightsError::Denied));
        assert_eq!(store.authorize_modification(MASTER, ADMIN, c2), Ok(()));
        assert_eq!(store.authorize_modification(MASTER, MASTER, c2), Ok(()));
        assert_eq!(store.authorize_modification(ADMIN, USER, c2), Ok(()));
        assert_eq!(store.authorize_modification(USER, USER, c2), Err(RightsError::Denied));
    }

    #[test]
    fn restricted_rights_need_a_holder() {
        let mut store = store();
        let au = RightSet::parse(":AU:").unwrap();
        assert_eq!(store.authorize_modification(ADMIN, USER, au), Err(RightsError::Denied));
        store.grant(ADMIN, Right::AddUser).unwrap();
        assert_eq!(store.authorize_modification(ADMIN, USER, au), Ok(()));
    }

    #[test]
    fn deleting_respects_tiers() {
        let mut store = store();
        assert_eq!(store.delete(ADMIN, MASTER), Err(RightsError::MasterDeletion));
        assert_eq!(store.delete(MASTER, MASTER), Err(RightsError::MasterDeletion));
        assert_eq!(store.delete(ADMIN, ADMIN), Err(RightsError::Denied));
        assert_eq!(store.delete(ADMIN, OTHER), Err(RightsError::UnknownPhone));
        store.delete(ADMIN, USER).unwrap();
        assert_eq!(store.tier_of(USER), None);
        store.delete(MASTER, ADMIN).unwrap();
        assert_eq!(store.tier_of(ADMIN), None);
    }

    #[derive(Default)]
    struct MemoryStore(Option<std::vec::Vec<u8>>);

    impl PersistentStore for MemoryStore {
        fn exists(&mut self) -> bool {
            self.0.is_some()
        }

        fn load(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
            let data = self.0.as_ref().ok_or(StoreError::Read)?;
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }

        fn save(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
            self.0 = Some(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn missing_document_yields_factory_config() {
        let mut mem = MemoryStore::default();
        let store = RightsStore::load(&mut mem).unwrap();
        assert_eq!(store.master(), None);
        assert!(store.admins().is_empty());
        assert_eq!(store.params().text("out1-cmd", ""), "OUT1");
    }

    #[test]
    fn saved_document_survives_reload() {
        let mut mem = MemoryStore::default();
        let mut original = store();
        original.grant(USER, Right::CanOut2).unwrap();
        original.params_mut().set_from_text("out2-sec", "9").unwrap();
        original.save(&mut mem).unwrap();

        let json = std::str::from_utf8(mem.0.as_ref().unwrap()).unwrap();
        assert!(json.starts_with(r#"{"version":1,"main":{"#));
        assert!(json.contains(r#""master":"+32444000001""#));
        assert!(json.contains(r#""pswd":null"#));
        assert!(json.contains(r#""users":{"+32444000003":":C1:C2:"}"#));

        let loaded = RightsStore::load(&mut mem).unwrap();
        assert_eq!(loaded.master(), Some(MASTER));
        assert_eq!(loaded.tier_of(ADMIN), Some(Tier::Admin));
        assert_eq!(loaded.rights_of(USER), RightSet::parse(":C1:C2:"));
        assert_eq!(loaded.params().int("out2-sec", 0), 9);
    }

    #[test]
    fn loading_fills_missing_parameters() {
        let mut mem = MemoryStore(Some(
            br#"{"version":1,"main":{"master":"+32444000001","out1-cmd":"OPEN"},"admins":{"+32444000001":":AU:C1:"},"users":{}}"#.to_vec(),
        ));
        let loaded = RightsStore::load(&mut mem).unwrap();
        assert_eq!(loaded.params().text("out1-cmd", ""), "OPEN");
        assert_eq!(loaded.params().text("out2-cmd", ""), "OUT2");
        assert_eq!(loaded.params().int("in4-idle", 0), 2);
    }

    #[test]
    fn invalid_documents_are_config_errors() {
        let mut garbage = MemoryStore(Some(b"not json".to_vec()));
        assert_eq!(RightsStore::load(&mut garbage).unwrap_err(), ConfigError::Malformed);

        let mut unknown_tag = MemoryStore(Some(br#"{"version":1,"main":{},"admins":{},"users":{"+3212":":ZZ:"}}"#.to_vec()));
        assert_eq!(RightsStore::load(&mut unknown_tag).unwrap_err(), ConfigError::Malformed);

        let mut future = MemoryStore(Some(br#"{"version":7,"main":{},"admins":{},"users":{}}"#.to_vec()));
        assert_eq!(RightsStore::load(&mut future).unwrap_err(), ConfigError::Version(7));

        let mut twice = MemoryStore(Some(
            br#"{"version":1,"main":{},"admins":{"+3212":":C1:"},"users":{"+3212":":C1:"}}"#.to_vec(),
        ));
        assert_eq!(RightsStore::load(&mut twice).unwrap_err(), ConfigError::DuplicatePhone);
    }

    #[test]
    fn add_user_refuses_known_phones() {
        let mut store = store();
        assert_eq!(store.add_user(ADMIN), Err(RightsError::AlreadyRegistered));
        assert_eq!(store.add_user("12"), Err(RightsError::InvalidPhone));
        store.add_user(OTHER).unwrap();
        assert_eq!(store.rights_of(OTHER), Some(RightSet::USER_DEFAULT));
    }
}
