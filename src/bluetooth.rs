use mio::Interest;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::os::unix::io::RawFd;
use std::{fmt, io, str};
use thiserror::Error;

/// A 6-byte long MAC address.
#[repr(C, packed)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BtAddr(pub [u8; 6]);

impl fmt::Debug for BtAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for BtAddr {
    /// Formats the address as `XX:XX:XX:XX:XX:XX`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl BtAddr {
    /// Returns the MAC address `00:00:00:00:00:00`
    pub fn any() -> BtAddr {
        BtAddr([0, 0, 0, 0, 0, 0])
    }

    /// Linux lower-layers actually hold the address in native byte-order
    /// althrough they are always displayed in network byte-order
    #[doc(hidden)]
    #[inline(always)]
    #[cfg(target_endian = "little")]
    pub fn convert_host_byteorder(self) -> BtAddr {
        let mut bytes = self.0;
        bytes.reverse();
        BtAddr(bytes)
    }

    #[doc(hidden)]
    #[inline(always)]
    #[cfg(target_endian = "big")]
    pub fn convert_host_byteorder(self) -> BtAddr {
        // Public address structure contents are always big-endian
        self
    }
}

impl str::FromStr for BtAddr {
    type Err = BtError;

    /// Converts a string of the format `XX:XX:XX:XX:XX:XX` to a `BtAddr`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BtError::InvalidAddress(s.to_owned());
        let mut addr = BtAddr::any();
        let mut i = 0;
        for split_str in s.split(':') {
            // only 6 values (0 <= i <= 5) are allowed
            if i == 6 || split_str.len() != 2 {
                return Err(invalid());
            }
            let high = (split_str.as_bytes()[0] as char)
                .to_digit(16)
                .ok_or_else(invalid)?;
            let low = (split_str.as_bytes()[1] as char)
                .to_digit(16)
                .ok_or_else(invalid)?;
            addr.0[i] = (high * 16 + low) as u8;
            i += 1;
        }
        if i != 6 {
            return Err(invalid());
        }
        Ok(addr)
    }
}

impl Serialize for BtAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BtAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// What needs to happen to advance an asynchronous process to its next state
#[derive(Debug)]
pub enum BtAsync<T> {
    /// Caller needs to wait for the file descriptor to reach the given readiness
    WaitFor(RawFd, Interest),

    /// Asynchronous transaction has completed
    Done(T),
}

/// Represents an error which occurred in this library.
#[derive(Debug, Error)]
pub enum BtError {
    /// No discovered service carries the requested display name.
    #[error("no service named {name:?} was found")]
    NotFound { name: String },

    /// The stream connection to a service could not be established.
    #[error("failed to connect to {target}")]
    Connection {
        target: String,
        #[source]
        source: Box<BtError>,
    },

    /// Writing to an established connection failed.
    #[error("failed to send payload")]
    Send {
        #[source]
        source: io::Error,
    },

    /// The operation is not valid in the current session state.
    #[error("session is not connected")]
    NotConnected,

    /// The remote SDP server answered with an error or an unreadable response.
    #[error("SDP: {0}")]
    Sdp(String),

    /// The string is not of the format `XX:XX:XX:XX:XX:XX`.
    #[error("invalid Bluetooth address {0:?}")]
    InvalidAddress(String),

    /// On Unix platforms: the error code and an explanation for this error code.
    #[error("{1}")]
    Errno(i32, String),

    /// This error only has a description.
    #[error("{0}")]
    Desc(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<nix::errno::Errno> for BtError {
    fn from(e: nix::errno::Errno) -> BtError {
        BtError::Errno(e as i32, e.desc().to_owned())
    }
}

/// The Bluetooth protocol you can use with this libary.
///
/// Will probably be always `RFCOMM`.
#[derive(Clone, Copy, Debug)]
pub enum BtProtocol {
    /// Serial RFCOMM connection to a bluetooth device.
    RFCOMM,
}

/// A device found by an inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtDevice {
    /// The MAC address of the device.
    pub addr: BtAddr,

    /// The 24-bit class of device.
    pub class: u32,
}

impl BtDevice {
    /// Create a new `BtDevice` manually from an addr and device class.
    pub fn new(addr: BtAddr, class: u32) -> BtDevice {
        BtDevice { addr, class }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn btaddr_from_string() {
        match BtAddr::from_str("00:00:00:00:00:00") {
            Ok(addr) => assert_eq!(addr, BtAddr([0u8; 6])),
            Err(_) => panic!(""),
        }

        let fail_strings = [
            "addr : String",
            "00:00:00:00:00",
            "00:00:00:00:00:00:00",
            "-00:00:00:00:00:00",
            "0G:00:00:00:00:00",
            "+0:00:00:00:00:00",
        ];
        for &s in &fail_strings {
            match BtAddr::from_str(s) {
                Ok(_) => panic!("Somehow managed to parse \"{}\" as an address?!", s),
                Err(BtError::InvalidAddress(input)) => assert_eq!(input, s),
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }
    }

    #[test]
    fn btaddr_to_string() {
        assert_eq!(BtAddr::any().to_string(), "00:00:00:00:00:00");
        assert_eq!(BtAddr([1, 2, 3, 4, 5, 0xab]).to_string(), "01:02:03:04:05:AB");
    }

    #[test]
    fn btaddr_parses_lowercase() {
        let addr_string = "00:ff:ee:ee:dd:12";
        let addr = BtAddr::from_str(addr_string).unwrap();
        assert_eq!(addr, BtAddr([0x00, 0xff, 0xee, 0xee, 0xdd, 0x12]));
        assert!(addr_string.eq_ignore_ascii_case(&addr.to_string()));
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn host_byteorder_is_reversed() {
        let addr = BtAddr([1, 2, 3, 4, 5, 6]);
        assert_eq!(addr.convert_host_byteorder(), BtAddr([6, 5, 4, 3, 2, 1]));
        assert_eq!(addr.convert_host_byteorder().convert_host_byteorder(), addr);
    }

    #[test]
    fn btaddr_serde_uses_display_form() {
        let addr = BtAddr([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"AA:BB:CC:00:11:22\"");
        assert_eq!(serde_json::from_str::<BtAddr>(&json).unwrap(), addr);
        assert!(serde_json::from_str::<BtAddr>("\"nope\"").is_err());
    }
}
