use crate::bluetooth::{BtAddr, BtDevice, BtError};
use crate::ffi::{self, BtProtocolBlueZ};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tracing::debug;

/// General Inquiry Access Code, little-endian.
const GIAC_LAP: [u8; 3] = [0x33, 0x8b, 0x9e];
/// Inquiry length is counted in units of 1.28 seconds.
const INQUIRY_UNIT_MS: u128 = 1280;
const MAX_INQUIRY_LENGTH: u8 = 0x30;
const MAX_RESPONSES: u8 = 255;

/// Finds Bluetooth devices in range with an HCI inquiry on the first adapter that is up.
///
/// This function blocks for about `timeout`.
pub fn scan_devices(timeout: Duration) -> Result<Vec<BtDevice>, BtError> {
    let fd = ffi::bluetooth_socket(libc::SOCK_RAW, BtProtocolBlueZ::HCI, false)?;
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    let dev_id = first_adapter_up(socket.as_raw_fd())?;
    let length = inquiry_length(timeout);
    debug!(dev_id, length, "starting inquiry");

    let mut buf = vec![
        0u8;
        size_of::<ffi::hci_inquiry_req>()
            + ffi::INQUIRY_INFO_SIZE * MAX_RESPONSES as usize
    ];
    let req = ffi::hci_inquiry_req {
        dev_id,
        flags: ffi::IREQ_CACHE_FLUSH,
        lap: GIAC_LAP,
        length,
        num_rsp: MAX_RESPONSES,
    };
    unsafe { std::ptr::write_unaligned(buf.as_mut_ptr() as *mut ffi::hci_inquiry_req, req) };

    if unsafe { libc::ioctl(socket.as_raw_fd(), ffi::HCIINQUIRY as _, buf.as_mut_ptr()) } < 0 {
        return Err(ffi::create_error_from_last("HCI inquiry failed"));
    }

    let devices = parse_inquiry_response(&buf)?;
    debug!(found = devices.len(), "inquiry complete");
    Ok(devices)
}

fn first_adapter_up(fd: RawFd) -> Result<u16, BtError> {
    let mut list = ffi::hci_dev_list_req {
        dev_num: ffi::HCI_MAX_DEV as u16,
        dev_req: [ffi::hci_dev_req::default(); ffi::HCI_MAX_DEV],
    };
    if unsafe {
        libc::ioctl(
            fd,
            ffi::HCIGETDEVLIST as _,
            &mut list as *mut ffi::hci_dev_list_req,
        )
    } < 0
    {
        return Err(ffi::create_error_from_last("Failed to list HCI devices"));
    }

    list.dev_req
        .iter()
        .take(list.dev_num as usize)
        .find(|req| req.dev_opt & (1 << ffi::HCI_UP) != 0)
        .map(|req| req.dev_id)
        .ok_or_else(|| BtError::Desc("no Bluetooth adapter is available".to_owned()))
}

fn inquiry_length(timeout: Duration) -> u8 {
    let units = (timeout.as_millis() + INQUIRY_UNIT_MS - 1) / INQUIRY_UNIT_MS;
    units.max(1).min(MAX_INQUIRY_LENGTH as u128) as u8
}

/// Decodes the buffer the kernel filled in for `HCIINQUIRY`.
fn parse_inquiry_response(buf: &[u8]) -> Result<Vec<BtDevice>, BtError> {
    let header_len = size_of::<ffi::hci_inquiry_req>();
    if buf.len() < header_len {
        return Err(BtError::Desc("inquiry buffer too short".to_owned()));
    }
    let req = unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const ffi::hci_inquiry_req) };

    let mut devices: Vec<BtDevice> = Vec::with_capacity(req.num_rsp as usize);
    for info in buf[header_len..]
        .chunks_exact(ffi::INQUIRY_INFO_SIZE)
        .take(req.num_rsp as usize)
    {
        let mut raw = [0u8; 6];
        raw.copy_from_slice(&info[..6]);
        let addr = BtAddr(raw).convert_host_byteorder();
        // dev_class follows bdaddr and the three page scan mode bytes
        let class = u32::from(info[9]) | u32::from(info[10]) << 8 | u32::from(info[11]) << 16;
        if devices.iter().all(|d| d.addr != addr) {
            devices.push(BtDevice::new(addr, class));
        }
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inquiry_buffer(entries: &[([u8; 6], [u8; 3])]) -> Vec<u8> {
        let mut buf = vec![0u8; size_of::<ffi::hci_inquiry_req>()];
        let req = ffi::hci_inquiry_req {
            num_rsp: entries.len() as u8,
            ..Default::default()
        };
        unsafe { std::ptr::write_unaligned(buf.as_mut_ptr() as *mut ffi::hci_inquiry_req, req) };
        for (addr, class) in entries {
            buf.extend_from_slice(addr);
            buf.extend_from_slice(&[1, 0, 0]);
            buf.extend_from_slice(class);
            buf.extend_from_slice(&[0x34, 0x12]);
        }
        // Unused slots the kernel never touched.
        buf.extend_from_slice(&[0u8; ffi::INQUIRY_INFO_SIZE * 2]);
        buf
    }

    #[test]
    fn inquiry_length_rounds_up_and_clamps() {
        assert_eq!(inquiry_length(Duration::from_secs(0)), 1);
        assert_eq!(inquiry_length(Duration::from_millis(1280)), 1);
        assert_eq!(inquiry_length(Duration::from_millis(1281)), 2);
        assert_eq!(inquiry_length(Duration::from_secs(8)), 7);
        assert_eq!(inquiry_length(Duration::from_secs(3600)), 0x30);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn parses_inquiry_results_in_host_order() {
        let buf = inquiry_buffer(&[
            ([0x06, 0x05, 0x04, 0x03, 0x02, 0x01], [0x0c, 0x02, 0x5a]),
            ([0xfd, 0x81, 0x73, 0xa9, 0xcb, 0xa5], [0x04, 0x08, 0x00]),
        ]);
        let devices = parse_inquiry_response(&buf).unwrap();
        assert_eq!(
            devices,
            vec![
                BtDevice::new(BtAddr([1, 2, 3, 4, 5, 6]), 0x5a020c),
                BtDevice::new(BtAddr([0xa5, 0xcb, 0xa9, 0x73, 0x81, 0xfd]), 0x000804),
            ]
        );
    }

    #[test]
    fn drops_duplicate_responses() {
        let entry = ([1, 1, 1, 1, 1, 1], [0, 0, 0]);
        let buf = inquiry_buffer(&[entry, entry]);
        assert_eq!(parse_inquiry_response(&buf).unwrap().len(), 1);
    }

    #[test]
    fn short_buffer_is_an_error() {
        assert!(parse_inquiry_response(&[0u8; 3]).is_err());
    }

    #[cfg(feature = "hardware_tests")]
    #[test]
    fn scans_devices() {
        scan_devices(Duration::from_secs(5)).unwrap();
    }
}
