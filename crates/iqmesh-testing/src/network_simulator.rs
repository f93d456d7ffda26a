//! Network Simulator for Testing
//!
//! Simulates an IQMESH coordinator and its nodes behind a [`DpaChannel`].
//! Answers every command the network operations send, honours FRC
//! selection order and the extra-result continuation, and supports fault
//! injection for error-path tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use iqmesh_dpa::frc::{
    command as frc_command, FRC_DATA_LEN, FRC_EXTRA_RESULT_LEN, FRC_RESPONSE_TIME_UNHANDLED,
};
use iqmesh_dpa::{
    cmd, pnum, CoordinatorParameters, DpaChannel, DpaRequest, DpaResponse, DpaTransactionResult,
    FrcResponseTime, NodeBitmap, TransactionFailure, BROADCAST_ADDRESS, COORDINATOR_ADDRESS,
    HWPID_DO_NOT_CHECK, MAX_DEVICE_ADDRESS,
};

/// Base of the coordinator's MID table in external EEPROM.
pub const MID_TABLE_BASE: u16 = 0x4000;

/// Bytes per address slot in the MID table.
pub const MID_SLOT_LEN: usize = 8;

/// Configuration block length returned by `CMD_OS_READ_CFG`.
pub const CONFIGURATION_LEN: usize = 31;

/// Largest external EEPROM read.
const MAX_XREAD_LEN: usize = 54;

/// Restore block length.
const RESTORE_BLOCK_LEN: usize = 49;

mod dpa_code {
    pub const FAIL: u8 = 1;
    pub const PCMD: u8 = 2;
    pub const ADDR: u8 = 4;
    pub const DATA_LEN: u8 = 5;
    pub const DATA: u8 = 6;
    pub const HWPID: u8 = 7;
    pub const CONFIRMATION: u8 = 0xFF;
}

/// A simulated node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedNode {
    /// Logical address; 254 for a node that only holds a temporary address
    pub address: u8,

    /// Module ID the device really has
    pub mid: u32,

    /// MID the coordinator has on record, when it differs from `mid`
    #[serde(default)]
    pub coordinator_mid: Option<u32>,

    /// Whether the node answers
    #[serde(default = "default_true")]
    pub online: bool,

    /// Hardware profile
    #[serde(default = "default_node_hwpid")]
    pub hwpid: u16,

    /// Packets counted during an RF signal test
    #[serde(default)]
    pub rf_counter: u8,

    /// Node-side bond; cleared by bond validation
    #[serde(default = "default_true")]
    pub bonded: bool,

    /// FRC response time its application handler needs, in ms; a node
    /// without one answers the response time FRC as unhandled
    #[serde(default)]
    pub frc_handler_ms: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_node_hwpid() -> u16 {
    0x0000
}

impl SimulatedNode {
    pub fn new(address: u8, mid: u32) -> Self {
        Self {
            address,
            mid,
            coordinator_mid: None,
            online: true,
            hwpid: default_node_hwpid(),
            rf_counter: 0,
            bonded: true,
            frc_handler_ms: None,
        }
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub fn with_hwpid(mut self, hwpid: u16) -> Self {
        self.hwpid = hwpid;
        self
    }

    pub fn with_rf_counter(mut self, counter: u8) -> Self {
        self.rf_counter = counter;
        self
    }

    pub fn with_frc_handler_time(mut self, time: FrcResponseTime) -> Self {
        self.frc_handler_ms = Some(time.as_millis());
        self
    }

    /// Record a different MID for this node in the coordinator.
    pub fn with_coordinator_mid(mut self, mid: u32) -> Self {
        self.coordinator_mid = Some(mid);
        self
    }

    fn answers(&self, hwpid: u16) -> bool {
        self.bonded && self.online && (hwpid == HWPID_DO_NOT_CHECK || hwpid == self.hwpid)
    }
}

/// Serializable description of a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Coordinator DPA version, e.g. `0x0414`
    #[serde(default = "default_dpa_version")]
    pub dpa_version: u16,

    #[serde(default = "default_os_version")]
    pub os_version: u8,

    #[serde(default = "default_os_build")]
    pub os_build: u16,

    #[serde(default = "default_coordinator_mid")]
    pub coordinator_mid: u32,

    /// First byte of the embedded peripheral bitmap
    #[serde(default = "default_embedded_peripherals")]
    pub embedded_peripherals: u8,

    /// Hex-encoded 31-byte configuration shared by all devices
    #[serde(default = "default_configuration")]
    pub configuration: String,

    #[serde(default = "default_rfpgm")]
    pub rfpgm: u8,

    /// Undocumented byte carrying the RF band in its low bits
    #[serde(default)]
    pub rf_band: u8,

    /// Packets counted by the coordinator during an RF signal test
    #[serde(default)]
    pub coordinator_rf_counter: u8,

    #[serde(default)]
    pub nodes: Vec<SimulatedNode>,
}

fn default_dpa_version() -> u16 {
    0x0414
}

fn default_os_version() -> u8 {
    0x43
}

fn default_os_build() -> u16 {
    0x08B8
}

fn default_coordinator_mid() -> u32 {
    0x8100_0001
}

fn default_embedded_peripherals() -> u8 {
    0b1111_1101
}

fn default_configuration() -> String {
    let mut configuration = [0u8; CONFIGURATION_LEN];
    configuration[0x00] = 0b1111_1101;
    configuration[0x01] = 0b0001_0111;
    configuration[0x04] = 0b0010_0101;
    configuration[0x07] = 7;
    configuration[0x08] = 5;
    configuration[0x09] = 6;
    configuration[0x0A] = 3;
    configuration[0x0B] = 0;
    configuration[0x10] = 52;
    configuration[0x11] = 2;
    hex::encode(configuration)
}

fn default_rfpgm() -> u8 {
    0b1100_0011
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            dpa_version: default_dpa_version(),
            os_version: default_os_version(),
            os_build: default_os_build(),
            coordinator_mid: default_coordinator_mid(),
            embedded_peripherals: default_embedded_peripherals(),
            configuration: default_configuration(),
            rfpgm: default_rfpgm(),
            rf_band: 0,
            coordinator_rf_counter: 0,
            nodes: Vec::new(),
        }
    }
}

impl NetworkSpec {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn with_dpa_version(mut self, version: u16) -> Self {
        self.dpa_version = version;
        self
    }

    pub fn with_node(mut self, node: SimulatedNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = SimulatedNode>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn with_configuration(mut self, configuration: [u8; CONFIGURATION_LEN]) -> Self {
        self.configuration = hex::encode(configuration);
        self
    }

    pub fn with_rfpgm(mut self, rfpgm: u8) -> Self {
        self.rfpgm = rfpgm;
        self
    }

    pub fn with_rf_band(mut self, rf_band: u8) -> Self {
        self.rf_band = rf_band;
        self
    }

    pub fn with_coordinator_rf_counter(mut self, counter: u8) -> Self {
        self.coordinator_rf_counter = counter;
        self
    }

    pub fn with_embedded_peripherals(mut self, peripherals: u8) -> Self {
        self.embedded_peripherals = peripherals;
        self
    }
}

/// Injected misbehaviour.
#[derive(Debug, Default)]
struct Faults {
    /// Next N requests time out
    transient_timeouts: usize,
    /// Remaining transport failures per (PNUM, PCMD)
    command_failures: HashMap<(u8, u8), usize>,
    /// Fixed device error per (PNUM, PCMD)
    command_errors: HashMap<(u8, u8), u8>,
    frc_status: Option<u8>,
    set_mid_rejected: HashSet<u8>,
}

enum Reply {
    Data(Vec<u8>),
    Error(u8),
    Failure(TransactionFailure),
}

struct NetworkState {
    spec: NetworkSpec,
    configuration: Vec<u8>,
    bonded: NodeBitmap,
    mid_table: Vec<u8>,
    frc_params: u8,
    pending_extra: Vec<u8>,
    restarts: HashMap<u8, usize>,
    restored_blocks: Vec<Vec<u8>>,
    resets: usize,
    requests: Vec<DpaRequest>,
    faults: Faults,
}

impl NetworkState {
    fn new(spec: NetworkSpec) -> anyhow::Result<Self> {
        let configuration = hex::decode(&spec.configuration)?;
        anyhow::ensure!(
            configuration.len() == CONFIGURATION_LEN,
            "configuration must be {} bytes, got {}",
            CONFIGURATION_LEN,
            configuration.len()
        );

        let mut bonded = NodeBitmap::new();
        let mut mid_table = vec![0u8; usize::from(MAX_DEVICE_ADDRESS) * MID_SLOT_LEN + MID_SLOT_LEN];
        for node in &spec.nodes {
            if node.address == COORDINATOR_ADDRESS
                || node.address > MAX_DEVICE_ADDRESS
                || bonded.contains(node.address)
            {
                continue;
            }
            bonded.insert(node.address)?;
            let slot = usize::from(node.address) * MID_SLOT_LEN;
            let recorded = node.coordinator_mid.unwrap_or(node.mid);
            mid_table[slot..slot + 4].copy_from_slice(&recorded.to_le_bytes());
        }

        Ok(Self {
            spec,
            configuration,
            bonded,
            mid_table,
            frc_params: FrcResponseTime::default().as_byte(),
            pending_extra: vec![0; FRC_EXTRA_RESULT_LEN],
            restarts: HashMap::new(),
            restored_blocks: Vec::new(),
            resets: 0,
            requests: Vec::new(),
            faults: Faults::default(),
        })
    }

    fn responder(&self, address: u8, hwpid: u16) -> Option<&SimulatedNode> {
        self.spec
            .nodes
            .iter()
            .find(|n| n.address == address && n.answers(hwpid))
    }

    fn dispatch(&mut self, request: &DpaRequest, timeout: Duration) -> Reply {
        let key = (request.pnum, request.pcmd);
        if self.faults.transient_timeouts > 0 {
            self.faults.transient_timeouts -= 1;
            return Reply::Failure(TransactionFailure::Timeout);
        }
        if let Some(remaining) = self.faults.command_failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Reply::Failure(TransactionFailure::Timeout);
            }
        }
        if let Some(code) = self.faults.command_errors.get(&key) {
            return Reply::Error(*code);
        }

        if request.nadr == u16::from(BROADCAST_ADDRESS) {
            self.broadcast(request)
        } else if request.nadr == u16::from(COORDINATOR_ADDRESS) {
            self.coordinator(request, timeout)
        } else {
            self.node(request)
        }
    }

    fn coordinator(&mut self, request: &DpaRequest, timeout: Duration) -> Reply {
        let pdata = request.pdata.as_slice();
        match (request.pnum, request.pcmd) {
            (pnum::COORDINATOR, cmd::coordinator::BONDED_DEVICES) => {
                Reply::Data(self.bonded.as_bytes().to_vec())
            }
            (pnum::COORDINATOR, cmd::coordinator::SET_MID) => self.set_mid(pdata),
            (pnum::COORDINATOR, cmd::coordinator::RESTORE) => {
                if pdata.len() != RESTORE_BLOCK_LEN {
                    return Reply::Error(dpa_code::DATA_LEN);
                }
                self.restored_blocks.push(pdata.to_vec());
                Reply::Data(Vec::new())
            }
            (pnum::EEEPROM, cmd::eeeprom::XREAD) => self.xread(pdata),
            (pnum::FRC, cmd::frc::SET_PARAMS) => match pdata.first() {
                Some(params) => {
                    let previous = std::mem::replace(&mut self.frc_params, *params);
                    Reply::Data(vec![previous])
                }
                None => Reply::Error(dpa_code::DATA_LEN),
            },
            (pnum::FRC, cmd::frc::SEND) => self.frc_send(false, pdata, request.hwpid, timeout),
            (pnum::FRC, cmd::frc::SEND_SELECTIVE) => {
                self.frc_send(true, pdata, request.hwpid, timeout)
            }
            (pnum::FRC, cmd::frc::EXTRA_RESULT) => Reply::Data(self.pending_extra.clone()),
            (pnum::OS, cmd::os::READ) => {
                Reply::Data(self.os_read(self.spec.coordinator_mid, self.spec.dpa_version))
            }
            (pnum::OS, cmd::os::READ_CFG) => Reply::Data(self.read_cfg()),
            (pnum::OS, cmd::os::RESET) => {
                self.resets += 1;
                Reply::Data(Vec::new())
            }
            (pnum::OS, cmd::os::TEST_RF_SIGNAL) => {
                if pdata.len() != 4 {
                    return Reply::Error(dpa_code::DATA_LEN);
                }
                let window_ms = u64::from(u16::from_le_bytes([pdata[2], pdata[3]])) * 10;
                if Duration::from_millis(window_ms) >= timeout {
                    return Reply::Failure(TransactionFailure::Timeout);
                }
                Reply::Data(vec![self.spec.coordinator_rf_counter])
            }
            (pnum::ENUMERATION, cmd::enumeration::GET_PER_INFO) => {
                let mut info = Vec::with_capacity(12);
                info.extend_from_slice(&self.spec.dpa_version.to_le_bytes());
                info.push(0);
                info.extend_from_slice(&[self.spec.embedded_peripherals, 0, 0, 0]);
                info.extend_from_slice(&0u16.to_le_bytes());
                info.extend_from_slice(&0u16.to_le_bytes());
                info.push(0);
                Reply::Data(info)
            }
            _ => Reply::Error(dpa_code::PCMD),
        }
    }

    fn node(&mut self, request: &DpaRequest) -> Reply {
        let Ok(address) = u8::try_from(request.nadr) else {
            return Reply::Failure(TransactionFailure::Timeout);
        };
        let Some(node) = self.responder(address, HWPID_DO_NOT_CHECK) else {
            return Reply::Failure(TransactionFailure::Timeout);
        };
        if request.hwpid != HWPID_DO_NOT_CHECK && request.hwpid != node.hwpid {
            return Reply::Error(dpa_code::HWPID);
        }
        let mid = node.mid;
        match (request.pnum, request.pcmd) {
            (pnum::OS, cmd::os::READ) => Reply::Data(self.os_read(mid, self.spec.dpa_version)),
            (pnum::OS, cmd::os::READ_CFG) => Reply::Data(self.read_cfg()),
            _ => Reply::Error(dpa_code::PCMD),
        }
    }

    fn broadcast(&mut self, request: &DpaRequest) -> Reply {
        if (request.pnum, request.pcmd) != (pnum::NODE, cmd::node::VALIDATE_BONDS) {
            return Reply::Data(Vec::new());
        }
        let pdata = &request.pdata;
        if pdata.is_empty() || pdata.len() % 5 != 0 {
            return Reply::Error(dpa_code::DATA_LEN);
        }
        for pair in pdata.chunks(5) {
            let address = pair[0];
            let mid = u32::from_le_bytes([pair[1], pair[2], pair[3], pair[4]]);
            for node in self
                .spec
                .nodes
                .iter_mut()
                .filter(|n| n.address == address && n.bonded && n.mid != mid)
            {
                tracing::debug!(address, mid = node.mid, "Simulated node dropped its bond");
                node.bonded = false;
            }
        }
        Reply::Data(Vec::new())
    }

    fn set_mid(&mut self, pdata: &[u8]) -> Reply {
        if pdata.len() != 5 {
            return Reply::Error(dpa_code::DATA_LEN);
        }
        let address = pdata[0];
        if !self.bonded.contains(address) {
            return Reply::Error(dpa_code::ADDR);
        }
        if self.faults.set_mid_rejected.contains(&address) {
            return Reply::Error(dpa_code::FAIL);
        }
        let slot = usize::from(address) * MID_SLOT_LEN;
        self.mid_table[slot..slot + 4].copy_from_slice(&pdata[1..5]);
        Reply::Data(Vec::new())
    }

    fn xread(&self, pdata: &[u8]) -> Reply {
        if pdata.len() != 3 {
            return Reply::Error(dpa_code::DATA_LEN);
        }
        let address = u16::from_le_bytes([pdata[0], pdata[1]]);
        let len = usize::from(pdata[2]);
        if len == 0 || len > MAX_XREAD_LEN {
            return Reply::Error(dpa_code::DATA_LEN);
        }
        let Some(offset) = address.checked_sub(MID_TABLE_BASE) else {
            return Reply::Error(dpa_code::ADDR);
        };
        match self
            .mid_table
            .get(usize::from(offset)..usize::from(offset) + len)
        {
            Some(bytes) => Reply::Data(bytes.to_vec()),
            None => Reply::Error(dpa_code::ADDR),
        }
    }

    fn frc_send(&mut self, selective: bool, pdata: &[u8], hwpid: u16, timeout: Duration) -> Reply {
        let frc_time = FrcResponseTime::from_byte(self.frc_params);
        if frc_time.as_duration() > timeout {
            return Reply::Failure(TransactionFailure::Timeout);
        }
        let Some((&command, rest)) = pdata.split_first() else {
            return Reply::Error(dpa_code::DATA_LEN);
        };
        let (targets, user_data) = if selective {
            match NodeBitmap::from_slice(rest) {
                Ok(selection) => (selection.addresses(), &rest[iqmesh_dpa::BITMAP_LEN..]),
                Err(_) => return Reply::Error(dpa_code::DATA_LEN),
            }
        } else {
            (self.bonded.addresses(), rest)
        };
        let targets: Vec<u8> = targets
            .into_iter()
            .filter(|a| *a != COORDINATOR_ADDRESS)
            .collect();

        let mut stream = [0u8; FRC_DATA_LEN + FRC_EXTRA_RESULT_LEN];
        let mut answered = 0u8;
        match command {
            frc_command::PING => {
                for &address in &targets {
                    if self.responder(address, hwpid).is_some() {
                        stream[usize::from(address / 8)] |= 1 << (address % 8);
                        answered += 1;
                    }
                }
            }
            frc_command::ACKNOWLEDGED_BROADCAST_BITS => {
                if user_data.len() < 5 {
                    return Reply::Error(dpa_code::DATA);
                }
                let embedded = (user_data[1], user_data[2]);
                let filter = u16::from_le_bytes([user_data[3], user_data[4]]);
                for &address in &targets {
                    if self.responder(address, hwpid).is_some()
                        && self.responder(address, filter).is_some()
                    {
                        stream[usize::from(address / 8)] |= 1 << (address % 8);
                        answered += 1;
                        if embedded == (pnum::OS, cmd::os::RESTART) {
                            *self.restarts.entry(address).or_default() += 1;
                        }
                    }
                }
            }
            frc_command::TEST_RF_SIGNAL => {
                for (index, &address) in targets.iter().enumerate() {
                    let Some(slot) = stream.get_mut(1 + index) else {
                        break;
                    };
                    if let Some(node) = self.responder(address, hwpid) {
                        *slot = node.rf_counter.saturating_add(1);
                        answered += 1;
                    }
                }
            }
            frc_command::FRC_RESPONSE_TIME => {
                for (index, &address) in targets.iter().enumerate() {
                    let Some(slot) = stream.get_mut(1 + index) else {
                        break;
                    };
                    if let Some(node) = self.responder(address, hwpid) {
                        *slot = match node.frc_handler_ms.and_then(FrcResponseTime::from_millis) {
                            Some(time) => time.as_byte() + 1,
                            None => FRC_RESPONSE_TIME_UNHANDLED,
                        };
                        answered += 1;
                    }
                }
            }
            frc_command::MEMORY_READ_4B => {
                let increment = u32::from(user_data.first().copied().unwrap_or(0));
                for (index, &address) in targets.iter().enumerate() {
                    let start = 4 + index * 4;
                    if start + 4 > stream.len() {
                        break;
                    }
                    if let Some(node) = self.responder(address, hwpid) {
                        let value = node.mid.wrapping_add(increment);
                        stream[start..start + 4].copy_from_slice(&value.to_le_bytes());
                        answered += 1;
                    }
                }
            }
            _ => return Reply::Error(dpa_code::DATA),
        }

        self.pending_extra = stream[FRC_DATA_LEN..].to_vec();
        let status = self.faults.frc_status.unwrap_or(answered);
        let mut response = Vec::with_capacity(1 + FRC_DATA_LEN);
        response.push(status);
        response.extend_from_slice(&stream[..FRC_DATA_LEN]);
        Reply::Data(response)
    }

    fn os_read(&self, mid: u32, dpa_version: u16) -> Vec<u8> {
        let mut info = Vec::with_capacity(30);
        info.extend_from_slice(&mid.to_le_bytes());
        info.push(self.spec.os_version);
        info.push(0x34);
        info.extend_from_slice(&self.spec.os_build.to_le_bytes());
        info.extend_from_slice(&[0x3F, 0x25, 0x00, 0x68]);
        info.extend_from_slice(&[0u8; 16]);
        info.extend_from_slice(&dpa_version.to_le_bytes());
        info
    }

    fn read_cfg(&self) -> Vec<u8> {
        let checksum = self.configuration.iter().fold(0x5F, |acc, b| acc ^ b);
        let obfuscate = self.spec.dpa_version < 0x0303;
        let mut response = Vec::with_capacity(CONFIGURATION_LEN + 3);
        response.push(checksum);
        response.extend(
            self.configuration
                .iter()
                .map(|b| if obfuscate { b ^ 0x34 } else { *b }),
        );
        response.push(self.spec.rfpgm);
        response.push(self.spec.rf_band);
        response
    }
}

/// Simulated coordinator and nodes.
pub struct SimulatedNetwork {
    parameters: CoordinatorParameters,
    state: Mutex<NetworkState>,
}

impl SimulatedNetwork {
    pub fn new(spec: NetworkSpec) -> anyhow::Result<Self> {
        let parameters = CoordinatorParameters {
            dpa_version: spec.dpa_version,
            os_version: spec.os_version,
            os_build: spec.os_build,
        };
        Ok(Self {
            parameters,
            state: Mutex::new(NetworkState::new(spec)?),
        })
    }

    /// Every request received so far.
    pub async fn requests(&self) -> Vec<DpaRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    /// Device-side FRC response time.
    pub async fn frc_response_time(&self) -> FrcResponseTime {
        FrcResponseTime::from_byte(self.state.lock().await.frc_params)
    }

    pub async fn set_frc_response_time(&self, time: FrcResponseTime) {
        self.state.lock().await.frc_params = time.as_byte();
    }

    /// Whole device-side FRC parameters byte.
    pub async fn frc_params(&self) -> u8 {
        self.state.lock().await.frc_params
    }

    pub async fn set_frc_params(&self, params: u8) {
        self.state.lock().await.frc_params = params;
    }

    /// MID the coordinator has recorded for `address`.
    pub async fn coordinator_mid(&self, address: u8) -> Option<u32> {
        let state = self.state.lock().await;
        if !state.bonded.contains(address) {
            return None;
        }
        let slot = usize::from(address) * MID_SLOT_LEN;
        let bytes = &state.mid_table[slot..slot + 4];
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub async fn bonded_addresses(&self) -> Vec<u8> {
        self.state.lock().await.bonded.addresses()
    }

    /// Whether a node at `address` with `mid` still holds its bond.
    pub async fn node_bonded(&self, address: u8, mid: u32) -> bool {
        self.state
            .lock()
            .await
            .spec
            .nodes
            .iter()
            .any(|n| n.address == address && n.mid == mid && n.bonded)
    }

    pub async fn set_online(&self, address: u8, online: bool) {
        let mut state = self.state.lock().await;
        for node in state.spec.nodes.iter_mut().filter(|n| n.address == address) {
            node.online = online;
        }
    }

    /// Restart count of a node from acknowledged broadcasts.
    pub async fn restarts(&self, address: u8) -> usize {
        self.state
            .lock()
            .await
            .restarts
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub async fn restored_blocks(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.restored_blocks.clone()
    }

    pub async fn reset_count(&self) -> usize {
        self.state.lock().await.resets
    }

    /// Make the next `count` requests time out.
    pub async fn fail_next(&self, count: usize) {
        self.state.lock().await.faults.transient_timeouts = count;
    }

    /// Make the next `count` requests with this PNUM/PCMD time out.
    pub async fn fail_command(&self, pnum: u8, pcmd: u8, count: usize) {
        self.state
            .lock()
            .await
            .faults
            .command_failures
            .insert((pnum, pcmd), count);
    }

    /// Answer every request with this PNUM/PCMD with a device error.
    pub async fn reject_command(&self, pnum: u8, pcmd: u8, code: u8) {
        self.state
            .lock()
            .await
            .faults
            .command_errors
            .insert((pnum, pcmd), code);
    }

    /// Report `status` in every FRC response.
    pub async fn override_frc_status(&self, status: Option<u8>) {
        self.state.lock().await.faults.frc_status = status;
    }

    /// Refuse `CMD_COORDINATOR_SET_MID` for one address.
    pub async fn reject_set_mid(&self, address: u8) {
        self.state
            .lock()
            .await
            .faults
            .set_mid_rejected
            .insert(address);
    }
}

/// Confirmation the coordinator sends before a routed request.
fn confirmation(request: &DpaRequest) -> Vec<u8> {
    DpaResponse::with_code(request, dpa_code::CONFIRMATION, vec![0x01, 0x06, 0x01]).to_bytes()
}

#[async_trait]
impl DpaChannel for SimulatedNetwork {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(&self, request: &DpaRequest, timeout: Duration) -> DpaTransactionResult {
        let mut state = self.state.lock().await;
        state.requests.push(request.clone());

        let mut result = DpaTransactionResult::started(request);
        if request.nadr != u16::from(COORDINATOR_ADDRESS) {
            result = result.with_confirmation(confirmation(request));
        }
        match state.dispatch(request, timeout) {
            Reply::Data(pdata) => result.with_response(DpaResponse::ok(request, pdata).to_bytes()),
            Reply::Error(code) => {
                result.with_response(DpaResponse::with_code(request, code, Vec::new()).to_bytes())
            }
            Reply::Failure(failure) => result.failed(failure),
        }
    }

    fn coordinator_parameters(&self) -> CoordinatorParameters {
        self.parameters
    }
}
