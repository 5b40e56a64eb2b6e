use codec::{encode, CodecError, Reader};

use crate::address::NetworkAddress;
use crate::error::ProtocolError;
use crate::iv::InventoryVector;
use crate::object::ObjectMessage;

/// Frame prefix identifying this network.
pub const MAGIC: u32 = 0xE9BE_B4D9;
/// Hard ceiling on a frame payload.
pub const MAX_PAYLOAD_LENGTH: usize = 1_600_003;
/// Most inventory vectors allowed in one `inv`/`getdata` frame.
pub const MAX_INV_LENGTH: usize = 50_000;
/// Most addresses allowed in one `addr` frame.
pub const MAX_ADDR_LENGTH: usize = 1_000;

const COMMAND_LENGTH: usize = 12;
const MAX_USER_AGENT_LENGTH: usize = 256;
const MAX_STREAMS: usize = 64;
const MAX_CUSTOM_LENGTH: usize = 100_000;

/// First four bytes of the double-SHA-512 of the payload.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = crypto::double_sha512(&[payload]);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// The version handshake announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetworkAddress,
    pub addr_from: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub streams: Vec<u64>,
}

impl Version {
    fn write(&self, out: &mut Vec<u8>) {
        encode::u32(self.version, out);
        encode::u64(self.services, out);
        encode::i64(self.timestamp, out);
        self.addr_recv.write_short(out);
        self.addr_from.write_short(out);
        encode::u64(self.nonce, out);
        encode::var_string(&self.user_agent, out);
        encode::var_int_list(&self.streams, out);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: reader.u32()?,
            services: reader.u64()?,
            timestamp: reader.i64()?,
            addr_recv: NetworkAddress::read_short(reader)?,
            addr_from: NetworkAddress::read_short(reader)?,
            nonce: reader.u64()?,
            user_agent: reader.var_string(MAX_USER_AGENT_LENGTH)?,
            streams: reader.var_int_list(MAX_STREAMS)?,
        })
    }
}

/// A complete frame as exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkMessage {
    Version(Version),
    VerAck,
    Addr(Vec<NetworkAddress>),
    Inv(Vec<InventoryVector>),
    GetData(Vec<InventoryVector>),
    Object(ObjectMessage),
    Custom(Vec<u8>),
}

impl NetworkMessage {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::VerAck => "verack",
            Self::Addr(_) => "addr",
            Self::Inv(_) => "inv",
            Self::GetData(_) => "getdata",
            Self::Object(_) => "object",
            Self::Custom(_) => "custom",
        }
    }

    /// Encode just the payload portion of the frame.
    pub fn payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        match self {
            Self::Version(version) => version.write(&mut out),
            Self::VerAck => {}
            Self::Addr(addresses) => {
                encode::var_int(addresses.len() as u64, &mut out);
                for address in addresses {
                    address.write(&mut out);
                }
            }
            Self::Inv(inventory) | Self::GetData(inventory) => {
                encode::var_int(inventory.len() as u64, &mut out);
                for iv in inventory {
                    iv.write(&mut out);
                }
            }
            Self::Object(object) => object.write(&mut out)?,
            Self::Custom(data) => out.extend_from_slice(data),
        }
        Ok(out)
    }

    /// Assemble the full frame: magic, command, length, checksum, payload.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = self.payload()?;
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(ProtocolError::PayloadTooLarge {
                length: payload.len(),
                limit: MAX_PAYLOAD_LENGTH,
            });
        }
        let mut frame = Vec::with_capacity(24 + payload.len());
        encode::u32(MAGIC, &mut frame);
        let mut command = [0u8; COMMAND_LENGTH];
        command[..self.command().len()].copy_from_slice(self.command().as_bytes());
        frame.extend_from_slice(&command);
        encode::u32(payload.len() as u32, &mut frame);
        frame.extend_from_slice(&checksum(&payload));
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a payload for a given command string.
    pub fn decode(command: &str, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(payload);
        let message = match command {
            "version" => Self::Version(Version::read(&mut reader)?),
            "verack" => Self::VerAck,
            "addr" => {
                let count = reader.var_int()?;
                if count > MAX_ADDR_LENGTH as u64 {
                    return Err(ProtocolError::PayloadTooLarge {
                        length: count as usize,
                        limit: MAX_ADDR_LENGTH,
                    });
                }
                let mut addresses = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    addresses.push(NetworkAddress::read(&mut reader)?);
                }
                Self::Addr(addresses)
            }
            "inv" => Self::Inv(read_inventory(&mut reader)?),
            "getdata" => Self::GetData(read_inventory(&mut reader)?),
            "object" => Self::Object(ObjectMessage::from_bytes(payload)?),
            "custom" => {
                if payload.len() > MAX_CUSTOM_LENGTH {
                    return Err(ProtocolError::PayloadTooLarge {
                        length: payload.len(),
                        limit: MAX_CUSTOM_LENGTH,
                    });
                }
                Self::Custom(payload.to_vec())
            }
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(message)
    }

    /// Decode a whole frame produced by [`NetworkMessage::to_frame`].
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(frame);
        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let command = parse_command(reader.take(COMMAND_LENGTH)?)?;
        let length = reader.u32()? as usize;
        if length > MAX_PAYLOAD_LENGTH {
            return Err(ProtocolError::PayloadTooLarge {
                length,
                limit: MAX_PAYLOAD_LENGTH,
            });
        }
        let expected: [u8; 4] = reader.array()?;
        let payload = reader.take(length)?;
        if checksum(payload) != expected {
            return Err(ProtocolError::ChecksumMismatch);
        }
        Self::decode(&command, payload)
    }
}

/// Interpret a 12-byte frame command field: ASCII, zero padded.
pub fn parse_command(raw: &[u8]) -> Result<String, ProtocolError> {
    let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
    let command = &raw[..end];
    if !command.iter().all(u8::is_ascii_lowercase) || raw[end..].iter().any(|&byte| byte != 0) {
        return Err(ProtocolError::UnknownCommand(
            String::from_utf8_lossy(raw).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(command).into_owned())
}

fn read_inventory(reader: &mut Reader<'_>) -> Result<Vec<InventoryVector>, ProtocolError> {
    let count = reader.var_int()?;
    if count > MAX_INV_LENGTH as u64 {
        return Err(ProtocolError::PayloadTooLarge {
            length: count as usize,
            limit: MAX_INV_LENGTH,
        });
    }
    let mut inventory = Vec::with_capacity(count as usize);
    for _ in 0..count {
        inventory.push(InventoryVector::read(reader)?);
    }
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{GenericPayload, ObjectPayload};
    use crate::unix_time;

    fn version() -> Version {
        Version {
            version: 3,
            services: NetworkAddress::NODE_NETWORK,
            timestamp: unix_time::now(),
            addr_recv: NetworkAddress::new("127.0.0.1:8444".parse().expect("addr"), 1),
            addr_from: NetworkAddress::any_local(),
            nonce: 0xdead_beef_cafe,
            user_agent: "/gossip:0.1/".to_string(),
            streams: vec![1, 2],
        }
    }

    fn frame_round_trip(message: NetworkMessage) -> NetworkMessage {
        let frame = message.to_frame().expect("frame");
        let decoded = NetworkMessage::from_frame(&frame).expect("decode");
        assert_eq!(decoded, message);
        decoded
    }

    #[test]
    fn every_command_round_trips() {
        frame_round_trip(NetworkMessage::Version(version()));
        frame_round_trip(NetworkMessage::VerAck);
        frame_round_trip(NetworkMessage::Addr(vec![NetworkAddress::new(
            "10.0.0.1:8444".parse().expect("addr"),
            1,
        )]));
        frame_round_trip(NetworkMessage::Inv(vec![
            InventoryVector::new([1; 32]),
            InventoryVector::new([2; 32]),
        ]));
        frame_round_trip(NetworkMessage::GetData(vec![InventoryVector::new([3; 32])]));
        let mut object = ObjectMessage::draft()
            .expires_time(unix_time::now_plus(300))
            .payload(ObjectPayload::Generic(GenericPayload {
                object_type: 42,
                version: 1,
                stream: 1,
                data: b"payload".to_vec(),
            }))
            .build()
            .expect("object");
        object.set_nonce([9; 8]);
        frame_round_trip(NetworkMessage::Object(object));
        frame_round_trip(NetworkMessage::Custom(b"custom data".to_vec()));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut frame = NetworkMessage::VerAck.to_frame().expect("frame");
        frame.extend_from_slice(b"x");
        // Rewrite the length so only the checksum disagrees.
        let length = 1u32.to_be_bytes();
        frame[16..20].copy_from_slice(&length);
        assert!(matches!(
            NetworkMessage::from_frame(&frame),
            Err(ProtocolError::ChecksumMismatch)
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut frame = NetworkMessage::VerAck.to_frame().expect("frame");
        frame[0] = 0;
        assert!(matches!(
            NetworkMessage::from_frame(&frame),
            Err(ProtocolError::BadMagic(_))
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let payload: [u8; 0] = [];
        let mut frame = Vec::new();
        encode::u32(MAGIC, &mut frame);
        frame.extend_from_slice(b"nonsense\0\0\0\0");
        encode::u32(0, &mut frame);
        frame.extend_from_slice(&checksum(&payload));
        assert!(matches!(
            NetworkMessage::from_frame(&frame),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn oversized_inventory_is_rejected() {
        let mut payload = Vec::new();
        encode::var_int(MAX_INV_LENGTH as u64 + 1, &mut payload);
        assert!(matches!(
            NetworkMessage::decode("inv", &payload),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn command_field_is_zero_padded_ascii() {
        let frame = NetworkMessage::GetData(Vec::new()).to_frame().expect("frame");
        assert_eq!(&frame[4..16], b"getdata\0\0\0\0\0");
        assert!(parse_command(b"getdata\0x\0\0\0").is_err());
    }
}
