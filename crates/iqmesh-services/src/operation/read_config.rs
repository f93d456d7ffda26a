//! Transceiver configuration read.
//!
//! `CMD_OS_READ_CFG` answers with a checksum, 31 configuration bytes, the
//! RFPGM byte and one undocumented byte whose low bits carry the RF band.
//! Coordinators older than DPA 3.03 obfuscate the configuration bytes.

use iqmesh_dpa::{
    cmd, pnum, DeviceAddress, DpaRequest, ExclusiveAccess, TransactionTrail, COORDINATOR_ADDRESS,
    MAX_DEVICE_ADDRESS,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::result::{OperationReport, OperationSummary};

pub const CONFIGURATION_LEN: usize = 31;

/// XOR key of configuration bytes below DPA 3.03.
const OBFUSCATION_KEY: u8 = 0x34;

const UART_BAUD_RATES: [u32; 9] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400];

const DPA_0303: u16 = 0x0303;
const DPA_0400: u16 = 0x0400;
const DPA_0410: u16 = 0x0410;

/// Device address accepted by the operation.
pub fn validate_address(device_addr: u16) -> Result<DeviceAddress> {
    DeviceAddress::try_from(device_addr)
        .ok()
        .filter(|a| *a <= MAX_DEVICE_ADDRESS)
        .ok_or_else(|| {
            ServiceError::parsing(format!(
                "deviceAddr must be at most {}, got {}",
                MAX_DEVICE_ADDRESS, device_addr
            ))
        })
}

/// Embedded peripherals enabled in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddedPeripherals {
    /// Raw bytes 0 to 3
    pub values: Vec<u8>,
    pub coordinator: bool,
    pub node: bool,
    pub os: bool,
    pub eeprom: bool,
    pub eeeprom: bool,
    pub ram: bool,
    pub ledr: bool,
    pub ledg: bool,
    pub spi: bool,
    pub io: bool,
    pub thermometer: bool,
    pub pwm: bool,
    pub uart: bool,
    /// Only reported below DPA 4.00
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frc: Option<bool>,
}

/// Decoded transceiver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrConfiguration {
    pub device_addr: DeviceAddress,
    pub checksum: u8,
    pub emb_pers: EmbeddedPeripherals,
    pub custom_dpa_handler: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_dpa_interface: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpa_peer_to_peer: Option<bool>,
    pub dpa_autoexec: bool,
    pub routing_off: bool,
    pub io_setup: bool,
    pub peer_to_peer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub never_sleep: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_and_lp_network: Option<bool>,
    pub rf_channel_a: u8,
    pub rf_channel_b: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rf_sub_channel_a: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rf_sub_channel_b: Option<u8>,
    pub tx_power: u8,
    pub rx_filter: u8,
    pub lp_rx_timeout: u8,
    pub rf_alt_dsm_channel: u8,
    /// 0 when the configured constant is unknown
    pub uart_baudrate: u32,
    pub rf_pgm_dual_channel: bool,
    pub rf_pgm_lp_mode: bool,
    pub rf_pgm_incorrect_upload: bool,
    pub rf_pgm_enable_after_reset: bool,
    #[serde(rename = "rfPgmTerminateAfter1Min")]
    pub rf_pgm_terminate_after_1min: bool,
    pub rf_pgm_terminate_mcu_pin: bool,
    /// "868", "916", "433" or empty when unknown
    pub rf_band: String,
}

fn bit(byte: u8, n: u8) -> bool {
    byte & (1 << n) != 0
}

impl TrConfiguration {
    /// Decode a `CMD_OS_READ_CFG` payload read from a coordinator running
    /// `dpa_version`.
    pub fn parse(device_addr: DeviceAddress, pdata: &[u8], dpa_version: u16) -> Result<Self> {
        let expected = 1 + CONFIGURATION_LEN + 2;
        if pdata.len() < expected {
            return Err(ServiceError::service(format!(
                "configuration response needs {} bytes, got {}",
                expected,
                pdata.len()
            )));
        }
        let checksum = pdata[0];
        let mut cfg = [0u8; CONFIGURATION_LEN];
        cfg.copy_from_slice(&pdata[1..=CONFIGURATION_LEN]);
        if dpa_version < DPA_0303 {
            for byte in &mut cfg {
                *byte ^= OBFUSCATION_KEY;
            }
        }
        let rfpgm = pdata[1 + CONFIGURATION_LEN];
        let undocumented = pdata[2 + CONFIGURATION_LEN];

        let emb_pers = EmbeddedPeripherals {
            values: cfg[0..4].to_vec(),
            coordinator: bit(cfg[0], 0),
            node: bit(cfg[0], 1),
            os: bit(cfg[0], 2),
            eeprom: bit(cfg[0], 3),
            eeeprom: bit(cfg[0], 4),
            ram: bit(cfg[0], 5),
            ledr: bit(cfg[0], 6),
            ledg: bit(cfg[0], 7),
            spi: bit(cfg[1], 0),
            io: bit(cfg[1], 1),
            thermometer: bit(cfg[1], 2),
            pwm: bit(cfg[1], 3),
            uart: bit(cfg[1], 4),
            frc: (dpa_version < DPA_0400).then(|| bit(cfg[1], 5)),
        };

        let flags = cfg[0x04];
        let below_400 = dpa_version < DPA_0400;
        let uart_baudrate = match UART_BAUD_RATES.get(usize::from(cfg[0x0A])) {
            Some(rate) => *rate,
            None => {
                warn!(constant = cfg[0x0A], "Unknown UART baud rate constant");
                0
            }
        };
        let rf_band = match undocumented & 0x03 {
            0b00 => "868",
            0b01 => "916",
            0b10 => "433",
            other => {
                warn!(band = other, "Unknown RF band");
                ""
            }
        };

        Ok(Self {
            device_addr,
            checksum,
            emb_pers,
            custom_dpa_handler: bit(flags, 0),
            node_dpa_interface: below_400.then(|| bit(flags, 1)),
            dpa_peer_to_peer: (dpa_version >= DPA_0410).then(|| bit(flags, 1)),
            dpa_autoexec: bit(flags, 2),
            routing_off: bit(flags, 3),
            io_setup: bit(flags, 4),
            peer_to_peer: bit(flags, 5),
            never_sleep: (dpa_version >= DPA_0303).then(|| bit(flags, 6)),
            std_and_lp_network: (!below_400).then(|| bit(flags, 7)),
            rf_channel_a: cfg[0x10],
            rf_channel_b: cfg[0x11],
            rf_sub_channel_a: below_400.then_some(cfg[0x05]),
            rf_sub_channel_b: below_400.then_some(cfg[0x06]),
            tx_power: cfg[0x07],
            rx_filter: cfg[0x08],
            lp_rx_timeout: cfg[0x09],
            rf_alt_dsm_channel: cfg[0x0B],
            uart_baudrate,
            rf_pgm_dual_channel: rfpgm & 0b0000_0011 == 0b0000_0011,
            rf_pgm_lp_mode: bit(rfpgm, 2),
            rf_pgm_incorrect_upload: bit(rfpgm, 3),
            rf_pgm_enable_after_reset: bit(rfpgm, 4),
            rf_pgm_terminate_after_1min: bit(rfpgm, 6),
            rf_pgm_terminate_mcu_pin: bit(rfpgm, 7),
            rf_band: rf_band.to_string(),
        })
    }
}

pub(crate) async fn run(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    device_addr: DeviceAddress,
    hwpid: u16,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    if device_addr != COORDINATOR_ADDRESS && !bonded.contains(&device_addr) {
        return Err(ServiceError::service("Node not bonded."));
    }

    let request = DpaRequest::new(device_addr, pnum::OS, cmd::os::READ_CFG).with_hwpid(hwpid);
    let response = access.execute_repeat(&request, repeat, None, trail).await?;

    // the coordinator's version decides the layout for every device
    let dpa_version = access.coordinator_parameters().dpa_version;
    let configuration = TrConfiguration::parse(device_addr, &response.pdata, dpa_version)?;
    info!(
        device_addr,
        dpa_version = %format!("{:04x}", dpa_version),
        "Configuration read"
    );

    Ok(OperationReport::new(OperationSummary::ReadConfig(Box::new(
        configuration,
    ))))
}
