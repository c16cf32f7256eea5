use crate::client::{ClientId, ClientRecord, VehicleId, STATUS_DISCONNECTING};
use crate::codec;
use crate::config::SharedSettings;
use crate::outbound::{NetworkSink, RateMonitor};
use crate::script::ScriptBridge;
use crate::vehicle::{self, MergeError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Compressed payloads carry this prefix ahead of the zlib stream.
const COMPRESSED_PREFIX: &[u8] = b"ABG:";

/// Vehicle packets past this size get an extra debug line.
const LARGE_VEHICLE_PACKET: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub name: String,
    pub client_id: ClientId,
    pub message: String,
}

/// In-memory chat record. Every message lands here, vetoed or not, and is
/// mirrored onto a dedicated tracing target.
#[derive(Default)]
pub struct ChatLog {
    entries: Mutex<Vec<ChatEntry>>,
}

impl ChatLog {
    pub fn record(&self, name: &str, client_id: ClientId, message: &str) {
        info!(target: "chat", "{} ({}): {}", name, client_id, message);
        self.entries.lock().push(ChatEntry {
            name: name.to_string(),
            client_id,
            message: message.to_string(),
        });
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.entries.lock().clone()
    }
}

/// Interprets decoded packets against per-client state and fans results out
/// through the network sink. Total over the opcode domain: no packet, however
/// malformed, escapes as an error.
pub struct Dispatcher {
    settings: SharedSettings,
    script: Arc<dyn ScriptBridge>,
    chat_log: ChatLog,
}

impl Dispatcher {
    pub fn new(settings: SharedSettings, script: Arc<dyn ScriptBridge>) -> Self {
        Self {
            settings,
            script,
            chat_log: ChatLog::default(),
        }
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat_log
    }

    /// Entry point for one decoded packet from one client.
    pub fn dispatch(
        &self,
        client: &Weak<ClientRecord>,
        packet: Vec<u8>,
        network: &dyn NetworkSink,
        monitor: &dyn RateMonitor,
    ) {
        let packet = if packet.starts_with(COMPRESSED_PREFIX) {
            match codec::decompress(&packet[COMPRESSED_PREFIX.len()..]) {
                Ok(inflated) => inflated,
                Err(e) => {
                    error!("dropping undecodable compressed packet: {}", e);
                    return;
                }
            }
        } else {
            packet
        };

        if packet.is_empty() {
            return;
        }
        let Some(client) = client.upgrade() else {
            return;
        };

        let code = packet[0];

        // Positional telemetry fast path; the whole band relays unreliably.
        if (b'V'..=b'Z').contains(&code) {
            monitor.increment_internal_pps();
            network.send_to_all(Some(&client), &packet, false, false);
            return;
        }

        match code {
            b'H' => {
                trace!("got 'H' packet ({} bytes)", packet.len());
                if !network.sync_client(&client) {
                    debug!("initial sync for {} failed", client.name());
                }
            }
            b'p' => {
                if !network.respond(&client, b"p", false) {
                    if client.status() > -1 {
                        client.set_status(STATUS_DISCONNECTING);
                    }
                } else {
                    network.update_player(&client);
                }
            }
            b'O' => {
                if packet.len() > LARGE_VEHICLE_PACKET {
                    debug!(
                        "received vehicle data from {}, size: {}",
                        client.name(),
                        packet.len()
                    );
                }
                if let Ok(text) = std::str::from_utf8(&packet) {
                    self.parse_vehicle(&client, text, network);
                } else {
                    debug!("dropping non-utf8 vehicle packet");
                }
            }
            b'J' => {
                trace!("got 'J' packet ({} bytes)", packet.len());
                network.send_to_all(Some(&client), &packet, false, true);
            }
            b'C' => {
                trace!("got 'C' packet ({} bytes)", packet.len());
                if let Ok(text) = std::str::from_utf8(&packet) {
                    self.handle_chat(&client, text, network);
                }
            }
            b'E' => {
                trace!("got 'E' packet ({} bytes)", packet.len());
                if let Ok(text) = std::str::from_utf8(&packet) {
                    self.handle_event(&client, text);
                }
            }
            b'N' => {
                trace!("got 'N' packet ({} bytes)", packet.len());
                network.send_to_all(Some(&client), &packet, false, true);
            }
            other => {
                trace!("possibly not implemented: opcode {:?}", other as char);
            }
        }
    }

    /// `C:<author>:<id>:<message>`. The hook may veto the fanout, but the
    /// message is written to the chat log regardless.
    fn handle_chat(&self, client: &ClientRecord, packet: &str, network: &dyn NetworkSink) {
        if packet.len() < 4 {
            return;
        }
        let Some(first) = find_byte_from(packet, b':', 3) else {
            return;
        };
        let message = match find_byte_from(packet, b':', first + 1) {
            Some(second) => &packet[second + 1..],
            None => &packet[first + 1..],
        };

        let outcome = self.script.trigger_event(
            "onChatMessage",
            &[
                Value::from(client.id()),
                Value::from(client.name()),
                Value::from(message),
            ],
            true,
        );
        self.chat_log.record(&client.name(), client.id(), message);
        if outcome.is_veto() {
            return;
        }
        network.send_to_all(None, packet.as_bytes(), true, true);
    }

    /// `E:<name>:<arg>`. Fire-and-forget; fields past the third are ignored.
    fn handle_event(&self, client: &ClientRecord, packet: &str) {
        let mut fields = packet.split(':');
        fields.next();
        let (Some(name), Some(arg)) = (fields.next(), fields.next()) else {
            return;
        };
        self.script.trigger_event(
            name,
            &[Value::from(client.id()), Value::from(arg)],
            false,
        );
    }

    fn parse_vehicle(&self, client: &ClientRecord, packet: &str, network: &dyn NetworkSink) {
        if packet.len() < 4 {
            return;
        }
        let data = &packet[3..];

        match packet.as_bytes()[1] {
            b's' => {
                trace!("got 'Os' packet ({} bytes)", packet.len());
                self.handle_spawn(client, packet, data, network);
            }
            b'c' => {
                trace!("got 'Oc' packet ({} bytes)", packet.len());
                self.handle_edit(client, packet, data, network);
            }
            b'd' => {
                trace!("got 'Od' packet ({} bytes)", packet.len());
                self.handle_delete(client, packet, data, network);
            }
            b'r' => {
                trace!("got 'Or' packet ({} bytes)", packet.len());
                self.handle_reset(client, packet, data, network);
            }
            b't' => {
                trace!("got 'Ot' packet ({} bytes)", packet.len());
                network.send_to_all(Some(client), packet.as_bytes(), false, true);
            }
            _ => {
                trace!("possibly not implemented: '{}'", packet);
            }
        }
    }

    fn handle_spawn(
        &self,
        client: &ClientRecord,
        packet: &str,
        data: &str,
        network: &dyn NetworkSink,
    ) {
        if !data.starts_with('0') {
            return;
        }
        let car_id = client.open_car_id();
        debug!("{} created a car with ID {}", client.name(), car_id);

        let car_json = &packet[4..];
        let rebuilt = format!(
            "Os:{}:{}:{}-{}:{}",
            client.roles(),
            client.name(),
            client.id(),
            car_id,
            car_json
        );

        let outcome = self.script.trigger_event(
            "onVehicleSpawn",
            &[
                Value::from(client.id()),
                Value::from(car_id),
                Value::from(&rebuilt[3..]),
            ],
            true,
        );

        if self.should_spawn(client, car_json, car_id) && !outcome.is_veto() {
            client.add_car(car_id, rebuilt.clone());
            network.send_to_all(None, rebuilt.as_bytes(), true, true);
        } else {
            self.respond_or_flag(client, rebuilt.as_bytes(), true, network);
            let destroy = format!("Od:{}-{}", client.id(), car_id);
            self.respond_or_flag(client, destroy.as_bytes(), true, network);
            debug!(
                "{} (force : car limit/script) removed ID {}",
                client.name(),
                car_id
            );
        }
    }

    /// A designated unicycle never counts toward the car quota.
    fn should_spawn(&self, client: &ClientRecord, car_json: &str, car_id: VehicleId) -> bool {
        let max_cars = self.settings.snapshot().server.max_cars;

        if client.unicycle_id().is_some() && client.car_count().saturating_sub(1) < max_cars {
            return true;
        }
        if vehicle::is_unicycle(car_json) {
            client.set_unicycle_id(Some(car_id));
            return true;
        }
        client.car_count() < max_cars
    }

    fn handle_edit(
        &self,
        client: &ClientRecord,
        packet: &str,
        data: &str,
        network: &dyn NetworkSink,
    ) {
        let Some((pid, vid)) = parse_id_pair(data, true) else {
            return;
        };
        if pid != client.id() {
            return;
        }

        let outcome = self.script.trigger_event(
            "onVehicleEdited",
            &[
                Value::from(client.id()),
                Value::from(vid),
                Value::from(&packet[3..]),
            ],
            true,
        );

        let delta = match packet.find('{') {
            Some(pos) => &packet[pos..],
            None => packet,
        };

        let keeps_unicycle = client.unicycle_id() != Some(vid) || vehicle::is_unicycle(delta);
        if keeps_unicycle && !outcome.is_veto() {
            network.send_to_all(Some(client), packet.as_bytes(), false, true);
            self.apply_edit(client, vid, packet);
        } else {
            if client.unicycle_id() == Some(vid) {
                client.set_unicycle_id(None);
            }
            let destroy = format!("Od:{}-{}", client.id(), vid);
            self.respond_or_flag(client, destroy.as_bytes(), true, network);
            client.delete_car(vid);
        }
    }

    fn apply_edit(&self, client: &ClientRecord, vid: VehicleId, packet: &str) {
        match vehicle::apply_edit(client, vid, packet) {
            Ok(()) => {}
            Err(MergeError::UnknownVehicle { vid, car_count }) => {
                error!(
                    vehicle_id = vid,
                    car_count, packet, "attempt to apply change to nonexistent vehicle"
                );
            }
            Err(e) => {
                error!(packet, "could not apply vehicle edit: {}", e);
            }
        }
    }

    fn handle_delete(
        &self,
        client: &ClientRecord,
        packet: &str,
        data: &str,
        network: &dyn NetworkSink,
    ) {
        let Some((pid, vid)) = parse_id_pair(data, false) else {
            return;
        };
        if pid != client.id() {
            return;
        }

        if client.unicycle_id() == Some(vid) {
            client.set_unicycle_id(None);
        }
        network.send_to_all(None, packet.as_bytes(), true, true);
        self.script.trigger_event(
            "onVehicleDeleted",
            &[Value::from(client.id()), Value::from(vid)],
            false,
        );
        client.delete_car(vid);
        debug!("{} deleted car with ID {}", client.name(), vid);
    }

    fn handle_reset(
        &self,
        client: &ClientRecord,
        packet: &str,
        data: &str,
        network: &dyn NetworkSink,
    ) {
        let Some((pid, vid)) = parse_id_pair(data, true) else {
            return;
        };
        if pid != client.id() {
            return;
        }

        let state = data.find('{').map(|pos| &data[pos..]).unwrap_or("");
        self.script.trigger_event(
            "onVehicleReset",
            &[
                Value::from(client.id()),
                Value::from(vid),
                Value::from(state),
            ],
            false,
        );
        network.send_to_all(Some(client), packet.as_bytes(), false, true);
    }

    fn respond_or_flag(
        &self,
        client: &ClientRecord,
        payload: &[u8],
        reliable: bool,
        network: &dyn NetworkSink,
    ) {
        if !network.respond(client, payload, reliable) && client.status() > -1 {
            client.set_status(STATUS_DISCONNECTING);
        }
    }
}

/// First occurrence of `byte` at or after `from`.
fn find_byte_from(s: &str, byte: u8, from: usize) -> Option<usize> {
    s.as_bytes()
        .iter()
        .skip(from)
        .position(|&b| b == byte)
        .map(|pos| pos + from)
}

/// Splits `"<pid>-<vid>"` (optionally `"<pid>-<vid>:rest"`), requiring both
/// components to be all ASCII digits. Anything else drops the subpacket.
fn parse_id_pair(data: &str, vid_ends_at_colon: bool) -> Option<(ClientId, VehicleId)> {
    let dash = data.find('-')?;
    let pid = digits(&data[..dash])?;
    let after = &data[dash + 1..];
    let vid_text = if vid_ends_at_colon {
        match after.find(':') {
            Some(colon) => &after[..colon],
            None => after,
        }
    } else {
        after
    };
    let vid = digits(vid_text)?;
    Some((pid, vid))
}

fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Per-client inbox. Packets from one session are handled strictly in
/// arrival order; the transport enqueues, a dedicated task drains.
pub struct PacketQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl PacketQueue {
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        client: Weak<ClientRecord>,
        network: Arc<dyn NetworkSink>,
        monitor: Arc<dyn RateMonitor>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                if client.strong_count() == 0 {
                    break;
                }
                dispatcher.dispatch(&client, packet, network.as_ref(), monitor.as_ref());
            }
        });
        Self { tx }
    }

    /// False once the worker has gone away.
    pub fn enqueue(&self, packet: Vec<u8>) -> bool {
        self.tx.send(packet).is_ok()
    }
}
