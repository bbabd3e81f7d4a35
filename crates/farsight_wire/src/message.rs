//! Downstream client messages and the per-tick bundle.
//!
//! These are the messages a witness emits towards its client each tick. The
//! set is closed: the decoder rejects unknown opcodes instead of skipping
//! them, because a misaligned stream can never resynchronize.

use crate::error::WireError;
use crate::stream::{BinaryReader, BinaryWriter, CompressionReader, CompressionWriter};
use crate::types::{EntityId, IdAlias};

mod opcode {
    pub const TICK_SYNC: u8 = 0x01;
    pub const RELATIVE_POSITION_REFERENCE: u8 = 0x02;
    pub const RELATIVE_POSITION: u8 = 0x03;
    pub const PLAYER_DETAILED_POSITION: u8 = 0x04;
    pub const SPACE_DATA: u8 = 0x05;
    pub const ENTER_AOI: u8 = 0x06;
    pub const ENTER_AOI_ON_VEHICLE: u8 = 0x07;
    pub const LEAVE_AOI: u8 = 0x08;
    pub const CREATE_ENTITY: u8 = 0x09;
    pub const ENTITY_UPDATE: u8 = 0x0A;
    pub const SET_VEHICLE: u8 = 0x0B;
    pub const SELECT_ENTITY: u8 = 0x0C;
    pub const SELECT_PLAYER_ENTITY: u8 = 0x0D;
}

/// One witness-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Low byte of the current game tick, sent once per outgoing packet.
    TickSync { tick: u8 },
    /// Announces which stored reference position subsequent relative
    /// positions are offsets from.
    RelativePositionReference { seq: u8 },
    /// Player position relative to the current reference position.
    /// Decoded for offload and replay playback; live witness streams
    /// carry absolute positions inside entity updates.
    RelativePosition { pos: [f32; 3] },
    /// Full-precision position and direction for the player entity.
    PlayerDetailedPosition { pos: [f32; 3], dir: [f32; 3] },
    /// One space-data entry the client has not seen yet.
    SpaceData {
        space_id: u32,
        key: u16,
        data: Vec<u8>,
    },
    /// Entity became visible; `alias` may be `NO_ID_ALIAS`.
    EnterAoi { id: EntityId, alias: IdAlias },
    /// Entity became visible while riding `vehicle`.
    EnterAoiOnVehicle {
        id: EntityId,
        vehicle: EntityId,
        alias: IdAlias,
    },
    /// Entity left the AoI.
    LeaveAoi { id: EntityId },
    /// Full entity state, sent once the client has confirmed an enter.
    /// Properties travel deflate-compressed.
    CreateEntity {
        id: EntityId,
        entity_type: u16,
        pos: [f32; 3],
        dir: [f32; 3],
        properties: Vec<u8>,
    },
    /// Incremental delta for an already-created entity.
    EntityUpdate {
        id: EntityId,
        alias: IdAlias,
        payload: Vec<u8>,
    },
    /// Passenger/vehicle relationship change.
    SetVehicle {
        passenger: EntityId,
        vehicle: EntityId,
    },
    /// Scopes subsequent volatile messages to this entity. Witnesses only
    /// select the player entity; the non-player form is decoded for
    /// spectator and replay streams.
    SelectEntity { id: EntityId },
    /// Scopes subsequent volatile messages to the player entity.
    SelectPlayerEntity,
}

impl ClientMessage {
    pub fn encode(&self, w: &mut BinaryWriter) -> Result<(), WireError> {
        match self {
            Self::TickSync { tick } => {
                w.write_u8(opcode::TICK_SYNC);
                w.write_u8(*tick);
            }
            Self::RelativePositionReference { seq } => {
                w.write_u8(opcode::RELATIVE_POSITION_REFERENCE);
                w.write_u8(*seq);
            }
            Self::RelativePosition { pos } => {
                w.write_u8(opcode::RELATIVE_POSITION);
                for v in pos {
                    w.write_f32(*v);
                }
            }
            Self::PlayerDetailedPosition { pos, dir } => {
                w.write_u8(opcode::PLAYER_DETAILED_POSITION);
                for v in pos.iter().chain(dir.iter()) {
                    w.write_f32(*v);
                }
            }
            Self::SpaceData {
                space_id,
                key,
                data,
            } => {
                w.write_u8(opcode::SPACE_DATA);
                w.write_u32(*space_id);
                w.write_u16(*key);
                w.write_blob(data);
            }
            Self::EnterAoi { id, alias } => {
                w.write_u8(opcode::ENTER_AOI);
                w.write_u32(*id);
                w.write_u8(*alias);
            }
            Self::EnterAoiOnVehicle { id, vehicle, alias } => {
                w.write_u8(opcode::ENTER_AOI_ON_VEHICLE);
                w.write_u32(*id);
                w.write_u32(*vehicle);
                w.write_u8(*alias);
            }
            Self::LeaveAoi { id } => {
                w.write_u8(opcode::LEAVE_AOI);
                w.write_u32(*id);
            }
            Self::CreateEntity {
                id,
                entity_type,
                pos,
                dir,
                properties,
            } => {
                w.write_u8(opcode::CREATE_ENTITY);
                w.write_u32(*id);
                w.write_u16(*entity_type);
                for v in pos.iter().chain(dir.iter()) {
                    w.write_f32(*v);
                }
                let mut cw = CompressionWriter::new(w);
                cw.writer().write_raw(properties);
                cw.finish()?;
            }
            Self::EntityUpdate { id, alias, payload } => {
                w.write_u8(opcode::ENTITY_UPDATE);
                w.write_u32(*id);
                w.write_u8(*alias);
                w.write_blob(payload);
            }
            Self::SetVehicle { passenger, vehicle } => {
                w.write_u8(opcode::SET_VEHICLE);
                w.write_u32(*passenger);
                w.write_u32(*vehicle);
            }
            Self::SelectEntity { id } => {
                w.write_u8(opcode::SELECT_ENTITY);
                w.write_u32(*id);
            }
            Self::SelectPlayerEntity => {
                w.write_u8(opcode::SELECT_PLAYER_ENTITY);
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut BinaryReader<'_>) -> Result<Self, WireError> {
        let op = r.read_u8()?;
        Ok(match op {
            opcode::TICK_SYNC => Self::TickSync { tick: r.read_u8()? },
            opcode::RELATIVE_POSITION_REFERENCE => {
                Self::RelativePositionReference { seq: r.read_u8()? }
            }
            opcode::RELATIVE_POSITION => Self::RelativePosition {
                pos: read_vec3(r)?,
            },
            opcode::PLAYER_DETAILED_POSITION => Self::PlayerDetailedPosition {
                pos: read_vec3(r)?,
                dir: read_vec3(r)?,
            },
            opcode::SPACE_DATA => Self::SpaceData {
                space_id: r.read_u32()?,
                key: r.read_u16()?,
                data: r.read_blob()?.to_vec(),
            },
            opcode::ENTER_AOI => Self::EnterAoi {
                id: r.read_u32()?,
                alias: r.read_u8()?,
            },
            opcode::ENTER_AOI_ON_VEHICLE => Self::EnterAoiOnVehicle {
                id: r.read_u32()?,
                vehicle: r.read_u32()?,
                alias: r.read_u8()?,
            },
            opcode::LEAVE_AOI => Self::LeaveAoi { id: r.read_u32()? },
            opcode::CREATE_ENTITY => {
                let id = r.read_u32()?;
                let entity_type = r.read_u16()?;
                let pos = read_vec3(r)?;
                let dir = read_vec3(r)?;
                let properties = CompressionReader::new(r)?.into_bytes();
                Self::CreateEntity {
                    id,
                    entity_type,
                    pos,
                    dir,
                    properties,
                }
            }
            opcode::ENTITY_UPDATE => Self::EntityUpdate {
                id: r.read_u32()?,
                alias: r.read_u8()?,
                payload: r.read_blob()?.to_vec(),
            },
            opcode::SET_VEHICLE => Self::SetVehicle {
                passenger: r.read_u32()?,
                vehicle: r.read_u32()?,
            },
            opcode::SELECT_ENTITY => Self::SelectEntity { id: r.read_u32()? },
            opcode::SELECT_PLAYER_ENTITY => Self::SelectPlayerEntity,
            other => return Err(WireError::UnknownMessage(other)),
        })
    }
}

fn read_vec3(r: &mut BinaryReader<'_>) -> Result<[f32; 3], WireError> {
    Ok([r.read_f32()?, r.read_f32()?, r.read_f32()?])
}

/// Append-only accumulator for one tick's downstream messages.
///
/// Tracks the serialized size as messages are pushed so the witness can
/// enforce its per-tick byte budget without re-encoding.
#[derive(Debug, Default)]
pub struct Bundle {
    messages: Vec<ClientMessage>,
    encoded: BinaryWriter,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: ClientMessage) -> Result<(), WireError> {
        msg.encode(&mut self.encoded)?;
        self.messages.push(msg);
        Ok(())
    }

    /// Serialized size in bytes of everything pushed so far.
    pub fn size(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ClientMessage] {
        &self.messages
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.encoded.into_bytes()
    }

    /// Decodes an encoded bundle back into its message sequence.
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<ClientMessage>, WireError> {
        let mut r = BinaryReader::new(bytes);
        let mut out = Vec::new();
        while r.remaining() > 0 {
            out.push(ClientMessage::decode(&mut r)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_ID_ALIAS;

    #[test]
    fn test_message_round_trip() {
        let messages = vec![
            ClientMessage::TickSync { tick: 0x2A },
            ClientMessage::RelativePositionReference { seq: 3 },
            ClientMessage::RelativePosition {
                pos: [1.0, -2.0, 3.5],
            },
            ClientMessage::SpaceData {
                space_id: 7,
                key: 16,
                data: vec![9, 9, 9],
            },
            ClientMessage::EnterAoi {
                id: 1001,
                alias: 17,
            },
            ClientMessage::EnterAoiOnVehicle {
                id: 1002,
                vehicle: 1001,
                alias: NO_ID_ALIAS,
            },
            ClientMessage::CreateEntity {
                id: 1001,
                entity_type: 4,
                pos: [100.0, 0.0, 250.0],
                dir: [0.0, 0.0, 1.0],
                properties: vec![0xAA; 300],
            },
            ClientMessage::EntityUpdate {
                id: 1001,
                alias: 17,
                payload: vec![1, 2, 3, 4],
            },
            ClientMessage::SetVehicle {
                passenger: 1002,
                vehicle: 1001,
            },
            ClientMessage::LeaveAoi { id: 1002 },
            ClientMessage::SelectPlayerEntity,
        ];

        let mut bundle = Bundle::new();
        for m in &messages {
            bundle.push(m.clone()).unwrap();
        }
        assert!(bundle.size() > 0);

        let decoded = Bundle::decode_all(&bundle.into_bytes()).unwrap();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let bytes = [0xEEu8];
        let mut r = BinaryReader::new(&bytes);
        assert!(matches!(
            ClientMessage::decode(&mut r),
            Err(WireError::UnknownMessage(0xEE))
        ));
    }

    #[test]
    fn test_bundle_size_tracks_pushes() {
        let mut bundle = Bundle::new();
        assert_eq!(bundle.size(), 0);
        bundle.push(ClientMessage::TickSync { tick: 0 }).unwrap();
        assert_eq!(bundle.size(), 2);
        bundle.push(ClientMessage::LeaveAoi { id: 1 }).unwrap();
        assert_eq!(bundle.size(), 7);
    }
}
