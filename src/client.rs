use crate::bluetooth::{BtAddr, BtError, BtProtocol};
use crate::hci;
use crate::sdp::{self, ServiceRecord};
use crate::session::{Session, Transport};
use crate::socket::BtSocket;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A connectable service found by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// The UUID the service was discovered by.
    pub identifier: Uuid,
    /// Display name; empty when the record carries none.
    pub name: String,
    pub host: BtAddr,
    /// RFCOMM channel.
    pub port: u8,
    pub description: Option<String>,
    pub provider: Option<String>,
}

impl ServiceDescriptor {
    /// Builds a descriptor from an SDP record, if the record names an RFCOMM channel.
    pub fn from_record(identifier: Uuid, host: BtAddr, record: ServiceRecord) -> Option<Self> {
        let port = record.rfcomm_channel()?;
        Some(ServiceDescriptor {
            identifier,
            name: record.name.unwrap_or_default(),
            host,
            port,
            description: record.description,
            provider: record.provider,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{} channel {}", self.host, self.port)
    }
}

/// Finds the services advertising a UUID.
pub trait ServiceDiscovery {
    fn discover(&mut self, identifier: &Uuid) -> Result<Vec<ServiceDescriptor>, BtError>;
}

/// Opens a stream to a discovered service.
pub trait Connector {
    type Stream: Transport;

    fn open(&self, target: &ServiceDescriptor) -> Result<Self::Stream, BtError>;
}

/// Fetches the records one device advertises for a UUID.
pub type RecordQuery = fn(BtAddr, &Uuid) -> Result<Vec<ServiceRecord>, BtError>;

/// Discovery through the local BlueZ stack: HCI inquiry, then SDP on every device found.
#[derive(Debug, Clone)]
pub struct BluezDiscovery {
    inquiry: Duration,
    hosts: Vec<BtAddr>,
    query: RecordQuery,
}

impl BluezDiscovery {
    /// Searches every device an inquiry of length `inquiry` finds.
    pub fn new(inquiry: Duration) -> Self {
        BluezDiscovery {
            inquiry,
            hosts: Vec::new(),
            query: sdp::search_services,
        }
    }

    /// Skips the inquiry and only queries `hosts`.
    pub fn with_hosts(mut self, hosts: Vec<BtAddr>) -> Self {
        self.hosts = hosts;
        self
    }

    /// Replaces the SDP search run against each host.
    pub fn with_query(mut self, query: RecordQuery) -> Self {
        self.query = query;
        self
    }

    fn candidate_hosts(&self) -> Result<Vec<BtAddr>, BtError> {
        if !self.hosts.is_empty() {
            return Ok(self.hosts.clone());
        }
        info!(seconds = self.inquiry.as_secs_f32(), "scanning for devices");
        let devices = hci::scan_devices(self.inquiry)?;
        info!(found = devices.len(), "inquiry finished");
        Ok(devices.into_iter().map(|device| device.addr).collect())
    }
}

impl ServiceDiscovery for BluezDiscovery {
    fn discover(&mut self, identifier: &Uuid) -> Result<Vec<ServiceDescriptor>, BtError> {
        let mut found = Vec::new();
        for host in self.candidate_hosts()? {
            let records = match (self.query)(host, identifier) {
                Ok(records) => records,
                Err(e) => {
                    warn!(%host, error = %e, "SDP query failed, skipping device");
                    continue;
                }
            };
            for record in records {
                let name = record.name.clone();
                match ServiceDescriptor::from_record(*identifier, host, record) {
                    Some(descriptor) => found.push(descriptor),
                    None => debug!(%host, ?name, "record has no RFCOMM channel"),
                }
            }
        }
        Ok(found)
    }
}

/// Connects RFCOMM sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct RfcommConnector;

impl Connector for RfcommConnector {
    type Stream = BtSocket;

    fn open(&self, target: &ServiceDescriptor) -> Result<BtSocket, BtError> {
        let mut socket = BtSocket::new(BtProtocol::RFCOMM)?;
        socket.connect(target.host, target.port)?;
        Ok(socket)
    }
}

/// Returns the first descriptor whose name is exactly `name`.
pub fn select<I>(descriptors: I, name: &str) -> Result<ServiceDescriptor, BtError>
where
    I: IntoIterator<Item = ServiceDescriptor>,
{
    descriptors
        .into_iter()
        .find(|descriptor| descriptor.name == name)
        .ok_or_else(|| BtError::NotFound {
            name: name.to_owned(),
        })
}

/// Finds a named service, connects to it and sends it text payloads.
#[derive(Debug)]
pub struct DiagnosticClient<D, C> {
    discovery: D,
    connector: C,
}

impl DiagnosticClient<BluezDiscovery, RfcommConnector> {
    pub fn bluez(discovery: BluezDiscovery) -> Self {
        DiagnosticClient::new(discovery, RfcommConnector)
    }
}

impl<D: ServiceDiscovery, C: Connector> DiagnosticClient<D, C> {
    pub fn new(discovery: D, connector: C) -> Self {
        DiagnosticClient {
            discovery,
            connector,
        }
    }

    pub fn discover(&mut self, identifier: &Uuid) -> Result<Vec<ServiceDescriptor>, BtError> {
        let descriptors = self.discovery.discover(identifier)?;
        debug!(%identifier, count = descriptors.len(), "discovery finished");
        Ok(descriptors)
    }

    pub fn select<I>(&self, descriptors: I, name: &str) -> Result<ServiceDescriptor, BtError>
    where
        I: IntoIterator<Item = ServiceDescriptor>,
    {
        select(descriptors, name)
    }

    pub fn connect(&self, descriptor: &ServiceDescriptor) -> Result<Session<C::Stream>, BtError> {
        let mut session = Session::new();
        session.connect(&self.connector, descriptor)?;
        Ok(session)
    }

    /// discover, select, connect, send each payload, close.
    ///
    /// Returns the service the payloads went to.
    pub fn run<S: AsRef<str>>(
        &mut self,
        identifier: &Uuid,
        name: &str,
        payloads: &[S],
    ) -> Result<ServiceDescriptor, BtError> {
        let descriptors = self.discover(identifier)?;
        let target = self.select(descriptors, name)?;
        info!(service = %target.name, endpoint = %target.endpoint(), "selected service");

        let mut session = self.connect(&target)?;
        for payload in payloads {
            session.send(payload.as_ref())?;
        }
        session.close();
        info!(count = payloads.len(), "all payloads sent");
        Ok(target)
    }
}
