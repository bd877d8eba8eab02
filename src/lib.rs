//! Find a Bluetooth RFCOMM service over SDP and talk to it.
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

#[macro_use]
extern crate enum_primitive;

mod ffi;

pub mod bluetooth;
pub mod cli;
pub mod client;
pub mod config;
pub mod hci;
pub mod logging;
pub mod sdp;
pub mod session;
pub mod socket;

pub use self::{
    bluetooth::{BtAddr, BtAsync, BtDevice, BtError, BtProtocol},
    client::{
        select, BluezDiscovery, Connector, DiagnosticClient, RecordQuery, RfcommConnector,
        ServiceDescriptor, ServiceDiscovery,
    },
    config::ProbeConfig,
    hci::scan_devices,
    session::{Session, SessionState, Transport},
    socket::{BtSocket, BtSocketConnect},
};
