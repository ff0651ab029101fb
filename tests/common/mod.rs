#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_time::{Duration, Instant};

use gate800c::control::{Board, Controller, Exit};
use gate800c::dispatcher::{DispatchPolicy, Dispatcher};
use gate800c::error::{FatalError, ModemError, StoreError};
use gate800c::handlers::register_gate_handlers;
use gate800c::platform::{
    Clock, DigitalInput, DigitalOutput, ModemChannel, ModemEvent, PersistentStore, SmsId, SmsMessage,
};

pub const MASTER: &str = "+32444000001";
pub const ADMIN: &str = "+32444000002";
pub const USER: &str = "+32444000003";
pub const STRANGER: &str = "+32444000009";

/// Master, one admin watching IN1, one plain user. IN1 alarms by SMS, IN2 by
/// call, both without observation delay.
pub const DOCUMENT: &str = r#"{"version":1,"main":{"master":"+32444000001","in1-mode":"H","in1-obs":0,"in2-mode":"H","in2-obs":0,"in2-ntyp":"C"},"admins":{"+32444000001":":AU:I1:I2:I3:I4:O1:O2:C1:C2:","+32444000002":":I1:C1:"},"users":{"+32444000003":":C1:"}}"#;

/// Scripted SIM800 stand-in.
#[derive(Default)]
pub struct FakeModem {
    pub registered: bool,
    pub fail_sends: bool,
    pub events: VecDeque<ModemEvent>,
    pub inbox: BTreeMap<SmsId, SmsMessage>,
    pub sent: Vec<(String, String)>,
    pub dialed: Vec<String>,
    /// Calls handling and storage commands, in order.
    pub log: Vec<&'static str>,
    next_id: SmsId,
}

impl FakeModem {
    pub fn registered() -> Self {
        Self {
            registered: true,
            ..Self::default()
        }
    }

    pub fn ring(&mut self, phone: &str) {
        self.events
            .push_back(ModemEvent::IncomingCall(phone.try_into().unwrap()));
    }

    pub fn receive(&mut self, phone: &str, text: &str) {
        self.next_id += 1;
        let sms = SmsMessage {
            sender: phone.try_into().unwrap(),
            text: text.try_into().unwrap(),
        };
        self.inbox.insert(self.next_id, sms);
        self.events.push_back(ModemEvent::SmsReceived(self.next_id));
    }

    pub fn take_sent(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.sent)
    }
}

impl ModemChannel for FakeModem {
    async fn is_registered(&mut self) -> Result<bool, ModemError> {
        Ok(self.registered)
    }

    async fn send(&mut self, phone: &str, text: &str) -> Result<(), ModemError> {
        if self.fail_sends {
            return Err(ModemError::Timeout);
        }
        self.sent.push((phone.to_owned(), text.to_owned()));
        Ok(())
    }

    fn poll_event(&mut self) -> Option<ModemEvent> {
        self.events.pop_front()
    }

    async fn read_sms(&mut self, id: SmsId) -> Result<SmsMessage, ModemError> {
        self.inbox.get(&id).cloned().ok_or(ModemError::Rejected)
    }

    async fn delete_sms(&mut self, id: SmsId) -> Result<(), ModemError> {
        self.log.push("CMGD");
        self.inbox.remove(&id).map(|_| ()).ok_or(ModemError::Rejected)
    }

    async fn delete_all_sms(&mut self) -> Result<(), ModemError> {
        self.log.push("CMGDA");
        self.inbox.clear();
        Ok(())
    }

    async fn answer_call(&mut self) -> Result<(), ModemError> {
        self.log.push("ATA");
        Ok(())
    }

    async fn hang_up(&mut self) -> Result<(), ModemError> {
        self.log.push("CHUP");
        Ok(())
    }

    async fn dial(&mut self, phone: &str) -> Result<(), ModemError> {
        self.log.push("ATD");
        self.dialed.push(phone.to_owned());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeInput(pub Rc<Cell<bool>>);

impl DigitalInput for FakeInput {
    fn read(&mut self) -> bool {
        self.0.get()
    }
}

/// Records every level written to the pin.
#[derive(Clone, Default)]
pub struct FakeOutput(pub Rc<RefCell<Vec<bool>>>);

impl FakeOutput {
    pub fn history(&self) -> Vec<bool> {
        self.0.borrow().clone()
    }
}

impl DigitalOutput for FakeOutput {
    fn set(&mut self, high: bool) {
        self.0.borrow_mut().push(high);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub saved: Option<Vec<u8>>,
}

impl PersistentStore for MemoryStore {
    fn exists(&mut self) -> bool {
        self.saved.is_some()
    }

    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let saved = self.saved.as_ref().ok_or(StoreError::Read)?;
        let target = buf.get_mut(..saved.len()).ok_or(StoreError::TooLarge)?;
        target.copy_from_slice(saved);
        Ok(saved.len())
    }

    fn save(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.saved = Some(bytes.to_vec());
        Ok(())
    }
}

/// Time only moves when the controller sleeps.
#[derive(Default)]
pub struct FakeClock {
    pub now: u64,
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.now)
    }

    async fn sleep(&mut self, duration: Duration) {
        self.now += duration.as_millis();
    }
}

pub type TestController = Controller<FakeModem, FakeInput, FakeOutput, MemoryStore, FakeClock>;

/// Handles on the board pins kept by the test.
pub struct Rig {
    pub inputs: [FakeInput; 4],
    pub run_switch: FakeInput,
    pub relays: [FakeOutput; 2],
    pub led: FakeOutput,
}

pub fn controller(modem: FakeModem, document: Option<&str>) -> (TestController, Rig) {
    let rig = Rig {
        inputs: Default::default(),
        run_switch: FakeInput(Rc::new(Cell::new(true))),
        relays: Default::default(),
        led: FakeOutput::default(),
    };
    let board = Board {
        inputs: rig.inputs.clone(),
        relays: rig.relays.clone(),
        led: rig.led.clone(),
        run_switch: rig.run_switch.clone(),
    };
    let store = MemoryStore {
        saved: document.map(|json| json.as_bytes().to_vec()),
    };
    let mut dispatcher = Dispatcher::new(DispatchPolicy::GATE);
    register_gate_handlers(&mut dispatcher).unwrap();
    let controller = Controller::new(modem, board, store, FakeClock::default(), dispatcher);
    (controller, rig)
}

/// Loads the configuration and runs the startup sequence.
pub fn start(controller: &mut TestController) -> Result<(), FatalError> {
    controller.load_config()?;
    block_on(controller.startup())
}

pub fn tick(controller: &mut TestController) -> Option<Exit> {
    block_on(controller.tick()).unwrap()
}

/// Ticks until the notification queue is empty and returns what was sent.
pub fn drain(controller: &mut TestController) -> Vec<(String, String)> {
    tick(controller);
    while !controller.queue().is_empty() {
        tick(controller);
    }
    controller.modem_mut().take_sent()
}

/// Texts sent to `phone`, in sending order.
pub fn texts_to(sent: &[(String, String)], phone: &str) -> Vec<String> {
    sent.iter()
        .filter(|(to, _)| to == phone)
        .map(|(_, text)| text.clone())
        .collect()
}
