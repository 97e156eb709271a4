//! Recording USB port for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::vec::Vec;

use usb_device::control::{Recipient, Request, RequestType};
use usb_device::UsbDirection;

use crate::ecm::config::REQ_SET_ETHERNET_PACKET_FILTER;
use crate::ecm::{EcmBridge, EcmConfig, UsbHandler, UsbPort};

/// An event the port dispatches on its next `poll`
#[derive(Debug, Clone)]
pub enum UsbEvent {
    Configured(u8),
    InterfaceActivated(u8),
    Reset,
    Control(Request),
    InComplete(u8, usize),
    OutComplete(u8, Vec<u8>),
}

#[derive(Default)]
pub struct RecordingPort {
    sent: RefCell<Vec<(u8, Vec<u8>)>>,
    armed: RefCell<Vec<(u8, usize)>>,
    zlps: Cell<usize>,
    events: RefCell<VecDeque<UsbEvent>>,
    polls: Cell<usize>,
    auto_complete: Cell<bool>,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send queues its own IN completion, as if the host read it
    pub fn complete_sends(&self, on: bool) {
        self.auto_complete.set(on);
    }

    pub fn push_event(&self, event: UsbEvent) {
        self.events.borrow_mut().push_back(event);
    }

    pub fn sent(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent.borrow().clone()
    }

    pub fn sent_on(&self, ep: u8) -> Vec<Vec<u8>> {
        self.sent
            .borrow()
            .iter()
            .filter(|(e, _)| *e == ep)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    pub fn armed(&self) -> Vec<(u8, usize)> {
        self.armed.borrow().clone()
    }

    pub fn zlps(&self) -> usize {
        self.zlps.get()
    }

    pub fn polls(&self) -> usize {
        self.polls.get()
    }
}

impl UsbPort for RecordingPort {
    fn send(&self, ep: u8, data: &[u8]) {
        self.sent.borrow_mut().push((ep, data.to_vec()));
        if self.auto_complete.get() {
            self.push_event(UsbEvent::InComplete(ep, data.len()));
        }
    }

    fn arm_receive(&self, ep: u8, capacity: usize) {
        self.armed.borrow_mut().push((ep, capacity));
    }

    fn send_control_zlp(&self) {
        self.zlps.set(self.zlps.get() + 1);
    }

    fn poll(&self, handler: &dyn UsbHandler) {
        self.polls.set(self.polls.get() + 1);
        // Release the borrow before dispatching; handlers call back into send()
        let event = self.events.borrow_mut().pop_front();
        match event {
            Some(UsbEvent::Configured(config)) => handler.configured(config),
            Some(UsbEvent::InterfaceActivated(alt)) => handler.interface_activated(alt),
            Some(UsbEvent::Reset) => handler.bus_reset(),
            Some(UsbEvent::Control(request)) => {
                handler.control_request(&request);
            }
            Some(UsbEvent::InComplete(ep, len)) => handler.transfer_in_complete(ep, len),
            Some(UsbEvent::OutComplete(ep, data)) => handler.transfer_out_complete(ep, &data),
            None => {}
        }
    }
}

/// A bridge on a recording port that has already seen SET_CONFIGURATION
pub fn configured_bridge() -> EcmBridge<RecordingPort> {
    configured_bridge_with(EcmConfig::default())
}

pub fn configured_bridge_with(config: EcmConfig) -> EcmBridge<RecordingPort> {
    let bridge = EcmBridge::new(RecordingPort::new(), config);
    bridge.configured(1);
    bridge
}

/// Host-to-device request addressed to an interface
pub fn interface_request(request_type: RequestType, request: u8, value: u16, index: u16) -> Request {
    Request {
        direction: UsbDirection::Out,
        request_type,
        recipient: Recipient::Interface,
        request,
        value,
        index,
        length: 0,
    }
}

/// SetEthernetPacketFilter(directed | broadcast | all multicast) on interface 0
pub fn filter_request() -> Request {
    interface_request(RequestType::Class, REQ_SET_ETHERNET_PACKET_FILTER, 0x000e, 0)
}

/// Port whose IN transfers complete inside `send`, as some device stacks
/// report them
pub struct InlinePort {
    recorder: RecordingPort,
    bridge: Weak<EcmBridge<InlinePort>>,
}

impl InlinePort {
    pub fn recorder(&self) -> &RecordingPort {
        &self.recorder
    }
}

impl UsbPort for InlinePort {
    fn send(&self, ep: u8, data: &[u8]) {
        self.recorder.send(ep, data);
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.transfer_in_complete(ep, data.len());
        }
    }

    fn arm_receive(&self, ep: u8, capacity: usize) {
        self.recorder.arm_receive(ep, capacity);
    }

    fn send_control_zlp(&self) {
        self.recorder.send_control_zlp();
    }

    fn poll(&self, handler: &dyn UsbHandler) {
        self.recorder.poll(handler);
    }
}

pub fn inline_bridge() -> Rc<EcmBridge<InlinePort>> {
    Rc::new_cyclic(|weak| {
        let port = InlinePort {
            recorder: RecordingPort::new(),
            bridge: weak.clone(),
        };
        EcmBridge::new(port, EcmConfig::default())
    })
}
