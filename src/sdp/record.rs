use super::element::{short_from_uuid, DataElement};
use crate::bluetooth::BtError;
use std::convert::TryFrom;
use std::ops::RangeInclusive;
use tracing::debug;
use uuid::Uuid;

pub const SERVICE_RECORD_HANDLE: u16 = 0x0000;
pub const SERVICE_CLASS_ID_LIST: u16 = 0x0001;
pub const SERVICE_ID: u16 = 0x0003;
pub const PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;
pub const LANGUAGE_BASE_ATTRIBUTE_ID_LIST: u16 = 0x0006;
pub const PROFILE_DESCRIPTOR_LIST: u16 = 0x0009;

/// Primary language base used when a record does not declare one.
const DEFAULT_LANGUAGE_BASE: u16 = 0x0100;
const NAME_OFFSET: u16 = 0;
const DESCRIPTION_OFFSET: u16 = 1;
const PROVIDER_OFFSET: u16 = 2;

const L2CAP_UUID16: u32 = 0x0100;
const RFCOMM_UUID16: u32 = 0x0003;
/// Server channels an RFCOMM service may listen on.
const RFCOMM_CHANNELS: RangeInclusive<u8> = 1..=30;

/// Where a service accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProtocol {
    Rfcomm(u8),
    L2cap(u16),
}

/// A decoded SDP service record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRecord {
    pub handle: Option<u32>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub service_id: Option<Uuid>,
    pub service_classes: Vec<Uuid>,
    /// Bluetooth profiles with their version.
    pub profiles: Vec<(Uuid, u16)>,
    pub protocol: Option<ServiceProtocol>,
}

impl ServiceRecord {
    /// Interprets one attribute list: a sequence of alternating attribute ids and values.
    pub fn from_attribute_list(list: &DataElement) -> Result<ServiceRecord, BtError> {
        let items = list
            .as_sequence()
            .ok_or_else(|| BtError::Sdp("attribute list is not a sequence".to_owned()))?;
        if items.len() % 2 != 0 {
            return Err(BtError::Sdp("attribute list has a dangling id".to_owned()));
        }

        let mut attributes = Vec::with_capacity(items.len() / 2);
        for pair in items.chunks_exact(2) {
            let id = match pair[0] {
                DataElement::U16(id) => id,
                ref other => {
                    return Err(BtError::Sdp(format!(
                        "attribute id must be a 16-bit uint, got {:?}",
                        other
                    )))
                }
            };
            attributes.push((id, &pair[1]));
        }
        let attribute = |id: u16| {
            attributes
                .iter()
                .find(|(attr, _)| *attr == id)
                .map(|(_, value)| *value)
        };

        let base = attribute(LANGUAGE_BASE_ATTRIBUTE_ID_LIST)
            .and_then(DataElement::as_sequence)
            .and_then(|triplets| triplets.get(2))
            .and_then(DataElement::as_unsigned)
            .map(|base| base as u16)
            .unwrap_or(DEFAULT_LANGUAGE_BASE);
        let text = |offset: u16| {
            attribute(base.wrapping_add(offset))
                .and_then(DataElement::as_text)
                .map(str::to_owned)
        };

        Ok(ServiceRecord {
            handle: attribute(SERVICE_RECORD_HANDLE)
                .and_then(DataElement::as_unsigned)
                .map(|h| h as u32),
            name: text(NAME_OFFSET),
            description: text(DESCRIPTION_OFFSET),
            provider: text(PROVIDER_OFFSET),
            service_id: attribute(SERVICE_ID).and_then(DataElement::as_uuid).copied(),
            service_classes: attribute(SERVICE_CLASS_ID_LIST)
                .and_then(DataElement::as_sequence)
                .map(|classes| classes.iter().filter_map(DataElement::as_uuid).copied().collect())
                .unwrap_or_default(),
            profiles: attribute(PROFILE_DESCRIPTOR_LIST)
                .and_then(DataElement::as_sequence)
                .map(parse_profiles)
                .unwrap_or_default(),
            protocol: attribute(PROTOCOL_DESCRIPTOR_LIST).and_then(parse_protocol),
        })
    }

    /// RFCOMM channel the service listens on, if it has one.
    pub fn rfcomm_channel(&self) -> Option<u8> {
        match self.protocol {
            Some(ServiceProtocol::Rfcomm(channel)) => Some(channel),
            _ => None,
        }
    }
}

fn parse_profiles(list: &[DataElement]) -> Vec<(Uuid, u16)> {
    list.iter()
        .filter_map(DataElement::as_sequence)
        .filter_map(|profile| match profile {
            [DataElement::Uuid(uuid), version, ..] => {
                Some((*uuid, version.as_unsigned().unwrap_or(0) as u16))
            }
            _ => None,
        })
        .collect()
}

/// Picks RFCOMM over plain L2CAP from a protocol descriptor list such as
/// `((L2CAP), (RFCOMM, channel))`. Alternatives are searched in order.
fn parse_protocol(list: &DataElement) -> Option<ServiceProtocol> {
    let stacks: Vec<&[DataElement]> = match list {
        DataElement::Alternative(alternatives) => alternatives
            .iter()
            .filter_map(DataElement::as_sequence)
            .collect(),
        DataElement::Sequence(layers) => vec![layers.as_slice()],
        _ => return None,
    };

    let mut found = None;
    for layers in stacks {
        for layer in layers.iter().filter_map(DataElement::as_sequence) {
            let protocol = layer.first().and_then(DataElement::as_uuid).and_then(short_from_uuid);
            let param = layer.get(1).and_then(DataElement::as_unsigned);
            match (protocol, param) {
                (Some(RFCOMM_UUID16), Some(channel)) => {
                    match u8::try_from(channel) {
                        Ok(channel) if RFCOMM_CHANNELS.contains(&channel) => {
                            return Some(ServiceProtocol::Rfcomm(channel))
                        }
                        _ => debug!(channel = %channel, "ignoring out of range RFCOMM channel"),
                    }
                }
                (Some(L2CAP_UUID16), Some(psm)) if found.is_none() => {
                    match u16::try_from(psm) {
                        Ok(psm) => found = Some(ServiceProtocol::L2cap(psm)),
                        Err(_) => debug!(psm = %psm, "ignoring out of range L2CAP PSM"),
                    }
                }
                _ => {}
            }
        }
    }
    found
}

/// Decodes the concatenated attribute lists of a ServiceSearchAttributeResponse.
pub fn parse_attribute_lists(bytes: &[u8]) -> Result<Vec<ServiceRecord>, BtError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let lists = DataElement::parse_exact(bytes)?;
    lists
        .as_sequence()
        .ok_or_else(|| BtError::Sdp("attribute lists are not a sequence".to_owned()))?
        .iter()
        .map(ServiceRecord::from_attribute_list)
        .collect()
}
