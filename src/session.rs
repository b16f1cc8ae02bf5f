// raprs - Session State Module
// Per-run bookkeeping: message ids, last sent message/raw payload,
// acknowledgement matching and the heard-stations list

use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::aprs::{AprsPacket, MAX_MESSAGE_ID};
use crate::ax25::Callsign;

/// The most recent message we sent, kept for manual repeat and ACK matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub addressee: String,
    pub text: String,
    pub id: Option<u16>,
    pub acknowledged: bool,
}

/// Mutable state shared by the link's read loop and the operator.
///
/// Created once per run and never persisted; the message-id counter
/// starts again at 1 on every start.
#[derive(Debug)]
pub struct SessionState {
    next_message_id: u16,
    ack_enabled: bool,
    last_message: Option<SentMessage>,
    last_raw: Option<Vec<u8>>,
    heard: HashMap<String, DateTime<Local>>,
}

impl SessionState {
    pub fn new(ack_enabled: bool) -> Self {
        SessionState {
            next_message_id: 1,
            ack_enabled,
            last_message: None,
            last_raw: None,
            heard: HashMap::new(),
        }
    }

    /// Inbound transition for every decoded frame: the source is recorded
    /// as heard, and an ACK for our last message id marks it acknowledged.
    /// Returns true when this packet acknowledged our last message.
    pub fn observe(&mut self, source: &Callsign, packet: &AprsPacket, at: DateTime<Local>) -> bool {
        self.record_heard(source, at);
        match packet {
            AprsPacket::Ack { id, .. } => self.check_ack(*id),
            _ => false,
        }
    }

    /// Returns true if the station was not in the list before
    pub fn record_heard(&mut self, source: &Callsign, at: DateTime<Local>) -> bool {
        self.heard.insert(source.to_string(), at).is_none()
    }

    pub fn check_ack(&mut self, id: u16) -> bool {
        match self.last_message.as_mut() {
            Some(message) if message.id == Some(id) => {
                message.acknowledged = true;
                true
            }
            _ => false,
        }
    }

    /// Builds the next message without changing any state: the id is
    /// the one the counter would hand out (none when ACKs are off). Pass
    /// it to `commit_message` once it has actually been sent.
    pub fn prepare_message(&self, addressee: &str, text: &str) -> SentMessage {
        SentMessage {
            addressee: addressee.trim().to_uppercase(),
            text: text.to_string(),
            id: self.ack_enabled.then_some(self.next_message_id),
            acknowledged: false,
        }
    }

    /// Records a sent message as the last one and moves the counter past
    /// its id
    pub fn commit_message(&mut self, message: SentMessage) {
        if let Some(id) = message.id {
            self.next_message_id = if id >= MAX_MESSAGE_ID { 1 } else { id + 1 };
        }
        self.last_message = Some(message);
    }

    pub fn record_raw(&mut self, payload: &[u8]) {
        self.last_raw = Some(payload.to_vec());
    }

    pub fn last_message(&self) -> Option<&SentMessage> {
        self.last_message.as_ref()
    }

    pub fn last_raw(&self) -> Option<&[u8]> {
        self.last_raw.as_deref()
    }

    pub fn next_message_id(&self) -> u16 {
        self.next_message_id
    }

    pub fn ack_enabled(&self) -> bool {
        self.ack_enabled
    }

    pub fn set_ack_enabled(&mut self, enabled: bool) {
        self.ack_enabled = enabled;
    }

    /// Flips the ACK setting and returns the new value
    pub fn toggle_ack(&mut self) -> bool {
        self.ack_enabled = !self.ack_enabled;
        self.ack_enabled
    }

    /// Heard stations sorted by callsign
    pub fn heard(&self) -> Vec<(String, DateTime<Local>)> {
        let mut heard: Vec<_> = self.heard.iter().map(|(k, v)| (k.clone(), *v)).collect();
        heard.sort_by(|a, b| a.0.cmp(&b.0));
        heard
    }

    /// When `callsign` was last heard. `X-0` and `X` are the same station.
    pub fn last_heard(&self, callsign: &str) -> Option<DateTime<Local>> {
        let key = match callsign.parse::<Callsign>() {
            Ok(parsed) => parsed.to_string(),
            Err(_) => callsign.trim().to_uppercase(),
        };
        self.heard.get(&key).copied()
    }

    pub fn clear_heard(&mut self) {
        self.heard.clear();
    }
}
