//! Raw HCI socket backend for scale scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, AdvertisementResult, SERVICE_DATA_16_TYPE, ScanError,
};
use crate::advertisement::{RawAdvertisement, service_key};
use libc::{
    AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t,
};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Passive scan, 10ms interval and window (0.625ms units)
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_SCAN_INTERVAL: u16 = 0x0010;
const LE_SCAN_WINDOW: u16 = 0x0010;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// Max HCI event size
const HCI_MAX_EVENT_SIZE: usize = 258;

/// Default controller (hci0)
const HCI_DEV_ID: u16 = 0;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

fn last_os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{}: {}", context, io::Error::last_os_error()))
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters command parameters
fn scan_parameters() -> [u8; 7] {
    let [interval_lo, interval_hi] = LE_SCAN_INTERVAL.to_le_bytes();
    let [window_lo, window_hi] = LE_SCAN_WINDOW.to_le_bytes();
    [
        LE_SCAN_PASSIVE,
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

/// Open a raw, non-blocking HCI socket bound to `dev_id`
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(last_os_error("Failed to create HCI socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(last_os_error("Failed to bind HCI socket"));
    }

    Ok(fd)
}

/// Only let LE meta events through
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(last_os_error("Failed to set HCI filter"));
    }
    Ok(())
}

fn send_hci_command(fd: &OwnedFd, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(last_os_error("Failed to send HCI command"));
    }
    Ok(())
}

/// Command socket with LE scanning enabled. Scanning is disabled again on drop.
struct ActiveScan {
    fd: OwnedFd,
}

impl ActiveScan {
    fn start(fd: OwnedFd) -> Result<Self, ScanError> {
        send_hci_command(&fd, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters())?;
        // enable, don't filter duplicates
        send_hci_command(&fd, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])?;
        Ok(Self { fd })
    }
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        if let Err(e) = send_hci_command(&self.fd, OCF_LE_SET_SCAN_ENABLE, &[0x00, 0x00]) {
            log::warn!("Failed to stop LE scan: {e}");
        }
    }
}

/// Format a little-endian HCI address as `AA:BB:CC:DD:EE:FF`.
fn format_address(le_bytes: &[u8]) -> String {
    le_bytes
        .iter()
        .rev()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Collect 16-bit service data entries from AD structures.
fn parse_service_data(ad_data: &[u8], advertisement: &mut RawAdvertisement) {
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        if ad_type == SERVICE_DATA_16_TYPE && len >= 3 {
            let uuid = u16::from_le_bytes([ad_data[offset + 2], ad_data[offset + 3]]);
            let data = ad_data[offset + 4..offset + 1 + len].to_vec();
            advertisement.service_data.insert(service_key(uuid), data);
        }

        offset += 1 + len;
    }
}

/// Parse an HCI LE advertising report event into an advertisement.
///
/// Only the first report of the event is used. Returns `None` for malformed
/// events and for advertisements without service data.
fn parse_advertising_report(event: &[u8]) -> Option<RawAdvertisement> {
    // packet type, event code, param len, subevent
    let report = event.get(4..)?;

    // num_reports(1) event_type(1) addr_type(1) addr(6) data_len(1)
    if report.first().copied().unwrap_or(0) == 0 || report.len() < 10 {
        return None;
    }

    let device = format_address(&report[3..9]);
    let data_len = report[9] as usize;
    let ad_data = report.get(10..10 + data_len)?;

    let mut advertisement = RawAdvertisement::new(device);
    parse_service_data(ad_data, &mut advertisement);
    (!advertisement.service_data.is_empty()).then_some(advertisement)
}

/// What to do after one non-blocking read from the event socket.
#[derive(Debug)]
enum ReadStep {
    /// `n` bytes of one HCI packet are in the buffer.
    Packet(usize),
    /// Interrupted by a signal, read again.
    Retry,
    /// Nothing left to read, wait for readiness.
    Drained,
    /// The socket failed or was closed. Readiness stays set, so the reader
    /// must stop instead of waiting again.
    Failed(ScanError),
}

/// Classify a read result, `None` meaning the socket would block.
fn read_step(result: Option<io::Result<usize>>) -> ReadStep {
    match result {
        Some(Ok(0)) => ReadStep::Failed(ScanError::Bluetooth("HCI socket closed".to_string())),
        Some(Ok(n)) => ReadStep::Packet(n),
        Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
        Some(Err(e)) => ReadStep::Failed(ScanError::Bluetooth(format!("HCI read error: {e}"))),
        None => ReadStep::Drained,
    }
}

/// Start scanning for advertisements using raw HCI sockets.
///
/// Opens one socket for events and one for commands, enables a passive LE
/// scan and forwards every advertisement carrying service data. The scan is
/// disabled when the receiver is dropped and the reader task notices.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<AdvertisementResult>, ScanError> {
    let fd = open_hci_socket(HCI_DEV_ID)?;
    set_hci_filter(&fd)?;

    let scan = ActiveScan::start(open_hci_socket(HCI_DEV_ID)?)?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let _scan = scan; // Keep scanning until this task ends
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        'events: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    let _ = tx
                        .send(Err(ScanError::Bluetooth(format!("HCI socket error: {e}"))))
                        .await;
                    break;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let result = guard
                    .try_io(|inner| {
                        let ret = unsafe {
                            libc::read(
                                inner.as_raw_fd(),
                                buf.as_mut_ptr() as *mut c_void,
                                buf.len(),
                            )
                        };
                        if ret < 0 {
                            Err(io::Error::last_os_error())
                        } else {
                            Ok(ret as usize)
                        }
                    })
                    .ok();
                let n = match read_step(result) {
                    ReadStep::Packet(n) => n,
                    ReadStep::Retry => continue,
                    ReadStep::Drained => break,
                    ReadStep::Failed(e) => {
                        let _ = tx.send(Err(e)).await;
                        break 'events;
                    }
                };

                let is_report = n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT;
                if is_report
                    && let Some(advertisement) = parse_advertising_report(&buf[..n])
                    && tx.send(Ok(advertisement)).await.is_err()
                {
                    break 'events;
                }
            }
        }
        log::debug!("HCI scan stopped");
    });

    Ok(rx)
}
