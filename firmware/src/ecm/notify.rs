//! CDC-ECM class notifications and the sequencer that orders them.
//!
//! The host driver ignores link speed and statistics until it has seen
//! NETWORK_CONNECTION, so CONNECTION_SPEED_CHANGE is only sent from the
//! completion of the connection notification. Both go out on the single
//! notification endpoint, which never has more than one in flight.

use portable_atomic::{AtomicU8, Ordering};

/// bmRequestType: device to host, class, interface
pub const NOTIFY_REQUEST_TYPE: u8 = 0xA1;
/// bNotificationType codes
pub const NETWORK_CONNECTION: u8 = 0x00;
pub const CONNECTION_SPEED_CHANGE: u8 = 0x2A;

/// Header-only notification size
pub const CONNECTION_NOTIFICATION_LEN: usize = 8;
/// Header plus DLBitRate/ULBitRate
pub const SPEED_NOTIFICATION_LEN: usize = 16;

/// Notification header, same layout as a SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationHeader {
    pub request_type: u8,
    pub notification: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl NotificationHeader {
    fn write(&self, out: &mut [u8]) {
        out[0] = self.request_type;
        out[1] = self.notification;
        out[2..4].copy_from_slice(&self.value.to_le_bytes());
        out[4..6].copy_from_slice(&self.index.to_le_bytes());
        out[6..8].copy_from_slice(&self.length.to_le_bytes());
    }
}

/// NETWORK_CONNECTION with wValue = 1 (connected)
pub fn connection_notification(interface: u16) -> [u8; CONNECTION_NOTIFICATION_LEN] {
    let mut out = [0u8; CONNECTION_NOTIFICATION_LEN];
    NotificationHeader {
        request_type: NOTIFY_REQUEST_TYPE,
        notification: NETWORK_CONNECTION,
        value: 1,
        index: interface,
        length: 0,
    }
    .write(&mut out);
    out
}

/// CONNECTION_SPEED_CHANGE carrying the downlink and uplink rates.
///
/// wLength stays zero, exactly as the reference firmware sends it; hosts
/// read the rates from the transfer length.
pub fn speed_notification(interface: u16, downlink_bps: u32, uplink_bps: u32) -> [u8; SPEED_NOTIFICATION_LEN] {
    let mut out = [0u8; SPEED_NOTIFICATION_LEN];
    NotificationHeader {
        request_type: NOTIFY_REQUEST_TYPE,
        notification: CONNECTION_SPEED_CHANGE,
        value: 0,
        index: interface,
        length: 0,
    }
    .write(&mut out);
    out[8..12].copy_from_slice(&downlink_bps.to_le_bytes());
    out[12..16].copy_from_slice(&uplink_bps.to_le_bytes());
    out
}

/// Which notification to put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Connection,
    Speed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NotifyState {
    Idle = 0,
    ConnectionPending = 1,
    ConnectionSent = 2,
    SpeedPending = 3,
    SpeedSent = 4,
}

impl NotifyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => NotifyState::ConnectionPending,
            2 => NotifyState::ConnectionSent,
            3 => NotifyState::SpeedPending,
            4 => NotifyState::SpeedSent,
            _ => NotifyState::Idle,
        }
    }
}

/// Idle -> ConnectionPending -> ConnectionSent -> SpeedPending -> SpeedSent -> Idle
///
/// The sequencer only decides; the bridge performs the sends. A `*Pending`
/// state means "claimed, not yet handed to the endpoint".
pub struct NotificationSequencer {
    state: AtomicU8,
}

impl NotificationSequencer {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(NotifyState::Idle as u8),
        }
    }

    pub fn state(&self) -> NotifyState {
        NotifyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Activation or packet-filter event. Claims a new cycle when idle;
    /// `false` means a cycle is already running and the event is absorbed.
    pub fn trigger(&self) -> bool {
        self.advance(NotifyState::Idle, NotifyState::ConnectionPending)
    }

    /// The claimed notification was handed to the endpoint
    pub fn sent(&self, notification: Notification) {
        let (from, to) = match notification {
            Notification::Connection => (NotifyState::ConnectionPending, NotifyState::ConnectionSent),
            Notification::Speed => (NotifyState::SpeedPending, NotifyState::SpeedSent),
        };
        self.advance(from, to);
    }

    /// The claimed notification could not be sent; end the cycle
    pub fn abort(&self) {
        self.reset();
    }

    /// Notification endpoint completion. Returns the notification that
    /// must follow, if any.
    pub fn complete(&self) -> Option<Notification> {
        self.complete_from(self.state())
    }

    /// Advance from `observed` only if no reset or new cycle replaced it
    /// in the meantime
    fn complete_from(&self, observed: NotifyState) -> Option<Notification> {
        match observed {
            // A synchronous completion may land before sent() is recorded
            NotifyState::ConnectionPending | NotifyState::ConnectionSent => self
                .advance(observed, NotifyState::SpeedPending)
                .then_some(Notification::Speed),
            NotifyState::SpeedPending | NotifyState::SpeedSent => {
                self.advance(observed, NotifyState::Idle);
                None
            }
            NotifyState::Idle => None,
        }
    }

    pub fn reset(&self) {
        self.state.store(NotifyState::Idle as u8, Ordering::Release);
    }

    fn advance(&self, from: NotifyState, to: NotifyState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for NotificationSequencer {
    fn default() -> Self {
        Self::new()
    }
}
