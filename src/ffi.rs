//! BlueZ socket definitions that `libc` does not carry.
#![allow(non_camel_case_types)]

use crate::bluetooth::{BtAddr, BtError};
use nix::errno::Errno;
use std::os::unix::io::RawFd;

pub const AF_BLUETOOTH: i32 = 31;

const BTPROTO_L2CAP: isize = 0;
const BTPROTO_HCI: isize = 1;
const BTPROTO_RFCOMM: isize = 3;

#[derive(Clone, Copy, Debug)]
pub enum BtProtocolBlueZ {
    L2CAP = BTPROTO_L2CAP,
    HCI = BTPROTO_HCI,
    RFCOMM = BTPROTO_RFCOMM,
}

/// `_IOR('H', 210, int)`
pub const HCIGETDEVLIST: u32 = 0x8004_48d2;
/// `_IOR('H', 240, int)`
pub const HCIINQUIRY: u32 = 0x8004_48f0;

pub const HCI_MAX_DEV: usize = 16;
/// Bit index of `HCI_UP` in `hci_dev_req::dev_opt`.
pub const HCI_UP: u32 = 0;
pub const IREQ_CACHE_FLUSH: u16 = 0x0001;

#[repr(C)]
#[derive(Copy, Debug, Clone)]
pub struct sockaddr_rc {
    pub rc_family: libc::sa_family_t,
    pub rc_bdaddr: BtAddr,
    pub rc_channel: u8,
}

#[repr(C)]
#[derive(Copy, Debug, Clone)]
pub struct sockaddr_l2 {
    pub l2_family: libc::sa_family_t,
    /// Little-endian.
    pub l2_psm: u16,
    pub l2_bdaddr: BtAddr,
    pub l2_cid: u16,
    pub l2_bdaddr_type: u8,
}

#[repr(C)]
#[derive(Copy, Debug, Clone, Default)]
pub struct hci_dev_req {
    pub dev_id: u16,
    pub dev_opt: u32,
}

#[repr(C)]
#[derive(Copy, Debug, Clone)]
pub struct hci_dev_list_req {
    pub dev_num: u16,
    pub dev_req: [hci_dev_req; HCI_MAX_DEV],
}

/// Header of the `HCIINQUIRY` buffer; `num_rsp` `inquiry_info` entries follow it.
#[repr(C)]
#[derive(Copy, Debug, Clone, Default)]
pub struct hci_inquiry_req {
    pub dev_id: u16,
    pub flags: u16,
    pub lap: [u8; 3],
    pub length: u8,
    pub num_rsp: u8,
}

/// Size of the packed `inquiry_info` entry.
pub const INQUIRY_INFO_SIZE: usize = 14;

/// Create an error
pub fn create_error_from_errno(message: &str, errno: Errno) -> BtError {
    BtError::Errno(errno as i32, format!("{}: {}", message, errno.desc()))
}

/// Create error from last
pub fn create_error_from_last(message: &str) -> BtError {
    create_error_from_errno(message, Errno::last())
}

/// Opens a close-on-exec `AF_BLUETOOTH` socket.
pub fn bluetooth_socket(
    kind: libc::c_int,
    proto: BtProtocolBlueZ,
    nonblocking: bool,
) -> Result<RawFd, BtError> {
    let mut flags = kind | libc::SOCK_CLOEXEC;
    if nonblocking {
        flags |= libc::SOCK_NONBLOCK;
    }
    let fd = unsafe { libc::socket(AF_BLUETOOTH, flags, proto as i32) };
    if fd < 0 {
        Err(create_error_from_last("Failed to create Bluetooth socket"))
    } else {
        Ok(fd)
    }
}

/// Fetches and clears the pending error of a socket (`SO_ERROR`).
pub fn take_socket_error(fd: RawFd) -> Result<Option<Errno>, BtError> {
    let mut err: libc::c_int = 0;
    let mut len = size_of::<libc::c_int>() as libc::socklen_t;
    if unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    } < 0
    {
        return Err(create_error_from_last("getsockopt(SO_ERROR) failed"));
    }
    Ok(if err == 0 {
        None
    } else {
        Some(Errno::from_i32(err))
    })
}

/// Issues a `connect()` that may still be in progress on return.
///
/// Returns `Ok(true)` when the connection completed immediately.
pub fn start_connect<T>(fd: RawFd, addr: &T, message: &str) -> Result<bool, BtError> {
    if unsafe {
        libc::connect(
            fd,
            addr as *const T as *const libc::sockaddr,
            size_of::<T>() as libc::socklen_t,
        )
    } < 0
    {
        match Errno::last() {
            Errno::EINPROGRESS | Errno::EAGAIN => Ok(false),
            errno => Err(create_error_from_errno(message, errno)),
        }
    } else {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn struct_layouts_match_bluez() {
        assert_eq!(size_of::<sockaddr_rc>(), 10);
        assert_eq!(size_of::<sockaddr_l2>(), 14);
        assert_eq!(size_of::<hci_dev_req>(), 8);
        assert_eq!(size_of::<hci_dev_list_req>(), 4 + 8 * HCI_MAX_DEV);
        assert_eq!(size_of::<hci_inquiry_req>(), 10);
    }

    #[test]
    fn errno_messages_carry_context() {
        match create_error_from_errno("Failed to connect() to target device", Errno::ECONNREFUSED)
        {
            BtError::Errno(code, message) => {
                assert_eq!(code, libc::ECONNREFUSED);
                assert!(message.starts_with("Failed to connect() to target device: "));
            }
            e => panic!("unexpected error {:?}", e),
        }
    }
}
