//! In-process device simulator.
//!
//! [`SimulatedDevice`] holds a register file and answers Modbus requests
//! through the [`GattEvents`] callbacks, like a real backend would.
//! [`SimFactory`] plugs it into a [`SessionController`](crate::SessionController).
//! Faults can be injected at any time from the test or CLI side.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gattbus_frame::{
    append_crc, is_valid, parse_registers, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS,
    WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_REGISTER,
};
use gattbus_link::{
    BackendFactory, ConnectionState, DeviceHandle, GattBackend, GattEvents, LinkError,
    GATT_SUCCESS,
};
use gattbus_protocol::group::{
    GEAR_ADDRESS, MOTOR_TEMP_ADDRESS, SWITCH_ADDRESS, TARGET_TEMP_ADDRESS,
};
use gattbus_protocol::{DeviceSettings, GroupId, SLAVE_ADDRESS};
use tracing::debug;

/// Status reported by the simulated stack when a connect is refused.
pub const CONNECT_FAILED_STATUS: u8 = 133;
/// Status reported when the simulated link is dropped.
pub const LINK_LOST_STATUS: u8 = 8;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_ADDRESS: u8 = 0x02;
const ILLEGAL_VALUE: u8 = 0x03;
const MAX_READ_QUANTITY: u16 = 125;

const IDLE_STATUS: [u16; 11] = [124, 0, 9, 0, 0, 0, 0, 0, 75, 76, 0];
const DEVICE_INFO: [u16; 4] = [0x0102, 0x0304, 0x2024, 0x0001];

/// A simulated device shared between its backends and the controlling side.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    input: BTreeMap<u16, u16>,
    holding: BTreeMap<u16, u16>,
    available: bool,
    fail_connects: u32,
    granted_mtu: Option<u16>,
    silenced: HashSet<GroupId>,
    silent: bool,
    corrupt_next: u32,
    stuck: HashMap<u16, u16>,
    response_delay: Duration,
    notify_enabled: bool,
    current: Option<(u64, GattEvents)>,
    next_link_id: u64,
    connects: u32,
    writes: Vec<(u16, Vec<u16>)>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// An idle device holding the default settings.
    pub fn new() -> Self {
        let mut input = BTreeMap::new();
        for (address, value) in (0u16..).zip(IDLE_STATUS) {
            input.insert(address, value);
        }
        let info_start = GroupId::DeviceInfo.descriptor().start_address;
        for (address, value) in (info_start..).zip(DEVICE_INFO) {
            input.insert(address, value);
        }

        let device = Self {
            state: Arc::new(Mutex::new(SimState {
                input,
                holding: BTreeMap::new(),
                available: true,
                fail_connects: 0,
                granted_mtu: None,
                silenced: HashSet::new(),
                silent: false,
                corrupt_next: 0,
                stuck: HashMap::new(),
                response_delay: Duration::ZERO,
                notify_enabled: false,
                current: None,
                next_link_id: 0,
                connects: 0,
                writes: Vec::new(),
            })),
        };
        device.load_settings(&DeviceSettings::default());
        device
    }

    /// A backend factory bound to this device.
    pub fn factory(&self) -> SimFactory {
        SimFactory {
            device: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the holding registers with `settings`. Not recorded as a write.
    pub fn load_settings(&self, settings: &DeviceSettings) {
        let mut state = self.lock();
        let mut block = settings.limits.to_registers().to_vec();
        block.extend(settings.tuning.to_registers());
        let config_start = GroupId::ConfigBlock.descriptor().start_address;
        for (address, value) in (config_start..).zip(block) {
            state.holding.insert(address, value);
        }
        state.holding.insert(SWITCH_ADDRESS, settings.switch_word());
        state.holding.insert(GEAR_ADDRESS, settings.gear_word());
        state.holding.insert(MOTOR_TEMP_ADDRESS, settings.motor_temp_word());
        state.holding.insert(TARGET_TEMP_ADDRESS, settings.target_temp_word());
        state.set_running(settings.power_on);
    }

    /// Make the factory refuse to create backends.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// Grant `mtu` regardless of what is requested. `None` grants the request.
    pub fn grant_link_budget(&self, mtu: Option<u16>) {
        self.lock().granted_mtu = mtu;
    }

    /// Stop answering reads of `group`.
    pub fn silence_group(&self, group: GroupId) {
        self.lock().silenced.insert(group);
    }

    pub fn restore_group(&self, group: GroupId) {
        self.lock().silenced.remove(&group);
    }

    /// Stop answering everything, including notification subscription.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Corrupt the checksum of the next `count` responses.
    pub fn corrupt_next_responses(&self, count: u32) {
        self.lock().corrupt_next = count;
    }

    /// Pin a holding register: writes are acknowledged but do not stick.
    pub fn stick_register(&self, address: u16, value: u16) {
        let mut state = self.lock();
        state.stuck.insert(address, value);
        state.holding.insert(address, value);
    }

    pub fn unstick_register(&self, address: u16) {
        self.lock().stuck.remove(&address);
    }

    /// Override one status register (index 0..11).
    pub fn set_status_register(&self, index: u16, value: u16) {
        self.lock().input.insert(index, value);
    }

    /// Deliver responses after `delay` instead of immediately.
    pub fn set_response_delay(&self, delay: Duration) {
        self.lock().response_delay = delay;
    }

    /// Drop the current link as if the radio went away.
    pub fn drop_link(&self) {
        let current = self.lock().current.take();
        if let Some((id, events)) = current {
            debug!(link = id, "simulated link drop");
            events.on_connection_state(ConnectionState::Disconnected {
                status: LINK_LOST_STATUS,
            });
        }
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.lock().holding.get(&address).copied()
    }

    /// Successful connections so far.
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// Every accepted write as `(start, values)`, oldest first.
    pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.lock().writes.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().current.is_some()
    }
}

impl SimState {
    fn set_running(&mut self, running: bool) {
        let (power, rpm, pressure) = if running { (40, 3100, 150) } else { (0, 0, 0) };
        self.input.insert(1, power);
        self.input.insert(3, rpm);
        self.input.insert(5, pressure);
    }

    fn write(&mut self, start: u16, values: &[u16]) {
        self.writes.push((start, values.to_vec()));
        for (address, value) in (start..).zip(values.iter().copied()) {
            if self.stuck.contains_key(&address) {
                continue;
            }
            self.holding.insert(address, value);
            if address == SWITCH_ADDRESS {
                self.set_running(value != 0);
            }
        }
    }

    fn is_silenced(&self, function: u8, start: u16) -> bool {
        GroupId::ALL.into_iter().any(|group| {
            let descriptor = group.descriptor();
            descriptor.function_code == function
                && descriptor.start_address == start
                && self.silenced.contains(&group)
        })
    }

    /// The device's reply to `frame`, if it replies at all.
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < 8 || !is_valid(frame) || frame[0] != SLAVE_ADDRESS {
            return None;
        }
        let function = frame[1];
        let start = u16::from_be_bytes([frame[2], frame[3]]);
        let word = u16::from_be_bytes([frame[4], frame[5]]);

        match function {
            READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => {
                if self.is_silenced(function, start) {
                    return None;
                }
                if word == 0 || word > MAX_READ_QUANTITY {
                    return Some(exception(function, ILLEGAL_VALUE));
                }
                let table = if function == READ_HOLDING_REGISTERS {
                    &self.holding
                } else {
                    &self.input
                };
                let mut payload = vec![SLAVE_ADDRESS, function, (word * 2) as u8];
                for offset in 0..word {
                    let Some(value) = start.checked_add(offset).and_then(|a| table.get(&a)) else {
                        return Some(exception(function, ILLEGAL_ADDRESS));
                    };
                    payload.extend_from_slice(&value.to_be_bytes());
                }
                Some(append_crc(&payload).to_vec())
            }
            WRITE_SINGLE_REGISTER => {
                if !self.holding.contains_key(&start) {
                    return Some(exception(function, ILLEGAL_ADDRESS));
                }
                self.write(start, &[word]);
                Some(frame.to_vec())
            }
            WRITE_MULTIPLE_REGISTERS => {
                let byte_count = usize::from(*frame.get(6)?);
                if byte_count != usize::from(word) * 2 || frame.len() != 7 + byte_count + 2 {
                    return Some(exception(function, ILLEGAL_VALUE));
                }
                let values = parse_registers(frame, 7, byte_count).ok()?;
                let known = (start..)
                    .take(values.len())
                    .all(|address| self.holding.contains_key(&address));
                if !known {
                    return Some(exception(function, ILLEGAL_ADDRESS));
                }
                self.write(start, &values);
                Some(append_crc(&frame[..6]).to_vec())
            }
            _ => Some(exception(function, ILLEGAL_FUNCTION)),
        }
    }
}

fn exception(function: u8, code: u8) -> Vec<u8> {
    append_crc(&[SLAVE_ADDRESS, function | 0x80, code]).to_vec()
}

/// Creates [`SimBackend`]s for one [`SimulatedDevice`].
#[derive(Clone)]
pub struct SimFactory {
    device: SimulatedDevice,
}

impl SimFactory {
    pub fn device(&self) -> &SimulatedDevice {
        &self.device
    }
}

impl BackendFactory for SimFactory {
    fn create(
        &self,
        device: &DeviceHandle,
        events: GattEvents,
    ) -> gattbus_link::Result<Box<dyn GattBackend>> {
        let mut state = self.device.lock();
        if !state.available {
            return Err(LinkError::Unavailable(format!("{device} not reachable")));
        }
        state.next_link_id += 1;
        Ok(Box::new(SimBackend {
            id: state.next_link_id,
            device: self.device.clone(),
            events,
        }))
    }
}

/// One simulated link.
pub struct SimBackend {
    id: u64,
    device: SimulatedDevice,
    events: GattEvents,
}

impl SimBackend {
    fn is_current(state: &SimState, id: u64) -> bool {
        state.current.as_ref().is_some_and(|(current, _)| *current == id)
    }
}

impl GattBackend for SimBackend {
    fn connect(&self) -> gattbus_link::Result<()> {
        let mut state = self.device.lock();
        if state.silent {
            return Ok(());
        }
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            drop(state);
            self.events.on_connection_state(ConnectionState::Disconnected {
                status: CONNECT_FAILED_STATUS,
            });
            return Ok(());
        }
        state.connects += 1;
        state.notify_enabled = false;
        state.current = Some((self.id, self.events.clone()));
        drop(state);
        self.events.on_connection_state(ConnectionState::Connected);
        Ok(())
    }

    fn discover_services(&self) -> gattbus_link::Result<()> {
        if !self.device.lock().silent {
            self.events.on_services_discovered(GATT_SUCCESS, true);
        }
        Ok(())
    }

    fn request_mtu(&self, mtu: u16) -> gattbus_link::Result<()> {
        let state = self.device.lock();
        if state.silent {
            return Ok(());
        }
        let granted = state.granted_mtu.unwrap_or(mtu);
        drop(state);
        self.events.on_mtu_changed(granted, GATT_SUCCESS);
        Ok(())
    }

    fn set_notify(&self, enabled: bool) -> gattbus_link::Result<()> {
        let mut state = self.device.lock();
        if state.silent {
            return Ok(());
        }
        state.notify_enabled = enabled;
        drop(state);
        self.events.on_notify_state(enabled, GATT_SUCCESS);
        Ok(())
    }

    fn write_command(&self, frame: &[u8]) -> gattbus_link::Result<()> {
        let mut state = self.device.lock();
        if !Self::is_current(&state, self.id) {
            return Err(LinkError::Unavailable("simulated link is down".to_string()));
        }
        if state.silent || !state.notify_enabled {
            return Ok(());
        }
        let Some(mut response) = state.respond(frame) else {
            return Ok(());
        };
        if state.corrupt_next > 0 {
            state.corrupt_next -= 1;
            if let Some(last) = response.last_mut() {
                *last ^= 0xFF;
            }
        }
        let delay = state.response_delay;
        drop(state);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !delay.is_zero() => {
                let events = self.events.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    events.on_notification(&response);
                });
            }
            _ => self.events.on_notification(&response),
        }
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.device.lock();
        if Self::is_current(&state, self.id) {
            state.current = None;
        }
        drop(state);
        self.events
            .on_connection_state(ConnectionState::Disconnected { status: 0 });
    }

    fn close(&self) {
        let mut state = self.device.lock();
        if Self::is_current(&state, self.id) {
            state.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use gattbus_frame::{
        build_read_request, build_write_multiple_registers, build_write_single_register,
    };
    use gattbus_protocol::group::CONFIG_TUNING_ADDRESS;

    use super::*;

    fn state(device: &SimulatedDevice) -> MutexGuard<'_, SimState> {
        device.lock()
    }

    #[test]
    fn reads_status_block() {
        let device = SimulatedDevice::new();
        let request = GroupId::Status.descriptor().request();
        let response = state(&device).respond(&request).unwrap();
        assert!(is_valid(&response));
        assert_eq!(&response[..3], &[0x01, 0x04, 22]);
        assert_eq!(&response[3..5], &124u16.to_be_bytes());
    }

    #[test]
    fn single_write_echoes_and_sticks() {
        let device = SimulatedDevice::new();
        let request = build_write_single_register(SLAVE_ADDRESS, GEAR_ADDRESS, 0x0105);
        let response = state(&device).respond(&request).unwrap();
        assert_eq!(response, request.to_vec());
        assert_eq!(device.holding_register(GEAR_ADDRESS), Some(0x0105));
        assert_eq!(device.writes(), vec![(GEAR_ADDRESS, vec![0x0105])]);
    }

    #[test]
    fn switch_write_starts_the_device() {
        let device = SimulatedDevice::new();
        let request = build_write_single_register(SLAVE_ADDRESS, SWITCH_ADDRESS, 1);
        state(&device).respond(&request).unwrap();
        let guard = state(&device);
        assert_eq!(guard.input.get(&1), Some(&40));
        assert_eq!(guard.input.get(&3), Some(&3100));
    }

    #[test]
    fn multi_write_acks_with_quantity() {
        let device = SimulatedDevice::new();
        let request =
            build_write_multiple_registers(SLAVE_ADDRESS, CONFIG_TUNING_ADDRESS, &[50, 1600, 4000, 70])
                .unwrap();
        let response = state(&device).respond(&request).unwrap();
        assert_eq!(response.len(), 8);
        assert_eq!(&response[..6], &[0x01, 0x10, 0x00, 0x14, 0x00, 0x04]);
        assert_eq!(device.holding_register(CONFIG_TUNING_ADDRESS + 1), Some(1600));
    }

    #[test]
    fn stuck_register_ignores_writes() {
        let device = SimulatedDevice::new();
        device.stick_register(GEAR_ADDRESS, 0x0003);
        let request = build_write_single_register(SLAVE_ADDRESS, GEAR_ADDRESS, 0x0007);
        assert!(state(&device).respond(&request).is_some());
        assert_eq!(device.holding_register(GEAR_ADDRESS), Some(0x0003));
    }

    #[test]
    fn unknown_addresses_raise_exceptions() {
        let device = SimulatedDevice::new();
        let response = state(&device)
            .respond(&build_read_request(SLAVE_ADDRESS, READ_HOLDING_REGISTERS, 0x0100, 1))
            .unwrap();
        assert_eq!(response[1], READ_HOLDING_REGISTERS | 0x80);
        assert_eq!(response[2], ILLEGAL_ADDRESS);
    }

    #[test]
    fn silenced_group_gets_no_reply() {
        let device = SimulatedDevice::new();
        device.silence_group(GroupId::DeviceInfo);
        let request = GroupId::DeviceInfo.descriptor().request();
        assert!(state(&device).respond(&request).is_none());
        device.restore_group(GroupId::DeviceInfo);
        assert!(state(&device).respond(&request).is_some());
    }

    #[test]
    fn garbage_is_ignored() {
        let device = SimulatedDevice::new();
        assert!(state(&device).respond(&[0x01, 0x03, 0x00]).is_none());
        assert!(state(&device)
            .respond(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00])
            .is_none());
    }
}
