//! Service Discovery Protocol client: finds the records a device advertises for a UUID.

pub mod element;
pub mod pdu;
pub mod record;
mod search;

pub use self::{
    element::DataElement,
    record::{ServiceProtocol, ServiceRecord},
    search::{search_services, ServiceSearch},
};
