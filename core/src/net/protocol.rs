//! Sync wire protocol commands.
//!
//! Every command is one leading command byte followed by a fixed payload.
//! All integers are big-endian.
//!
//! # Wire Format
//!
//! ```text
//! 0 SET_KEY      [track:u32][row:u32][value:f32 bits][interpolation:u8]
//! 1 DELETE_KEY   [track:u32][row:u32]
//! 2 GET_TRACK    ([index:u32] Indexed only)[name_len:u32][name...]
//! 3 SET_ROW      [row:u32]
//! 4 PAUSE        [flag:u8]
//! 5 SAVE_TRACKS
//! ```

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use synctrack_shared::{Interpolation, KeyFrame};
use thiserror::Error;

pub const CMD_SET_KEY: u8 = 0;
pub const CMD_DELETE_KEY: u8 = 1;
pub const CMD_GET_TRACK: u8 = 2;
pub const CMD_SET_ROW: u8 = 3;
pub const CMD_PAUSE: u8 = 4;
pub const CMD_SAVE_TRACKS: u8 = 5;

/// Longest track name accepted in a GET_TRACK request
pub const MAX_TRACK_NAME_LEN: u32 = 0xFFFF;

/// GET_TRACK layout spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireDialect {
    /// `name_len, name`. The server numbers requests in arrival order.
    #[default]
    Standard,
    /// `index, name_len, name`. The client picks its own index.
    Indexed,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown command byte {0}")]
    UnknownCommand(u8),
    #[error("invalid interpolation type {0}")]
    InvalidInterpolation(u8),
    #[error("empty track name")]
    EmptyTrackName,
    #[error("track name length {0} exceeds 65535 bytes")]
    TrackNameTooLong(u32),
    #[error("track name contains NUL")]
    NameContainsNul,
    #[error("track name is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    SetKey { track: u32, key: KeyFrame },
    DeleteKey { track: u32, row: u32 },
    /// `index` is only carried by [`WireDialect::Indexed`].
    GetTrack { index: Option<u32>, name: String },
    SetRow { row: u32 },
    Pause { paused: bool },
    SaveTracks,
}

impl SyncCommand {
    pub fn command_byte(&self) -> u8 {
        match self {
            Self::SetKey { .. } => CMD_SET_KEY,
            Self::DeleteKey { .. } => CMD_DELETE_KEY,
            Self::GetTrack { .. } => CMD_GET_TRACK,
            Self::SetRow { .. } => CMD_SET_ROW,
            Self::Pause { .. } => CMD_PAUSE,
            Self::SaveTracks => CMD_SAVE_TRACKS,
        }
    }

    /// Protocol name, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetKey { .. } => "SET_KEY",
            Self::DeleteKey { .. } => "DELETE_KEY",
            Self::GetTrack { .. } => "GET_TRACK",
            Self::SetRow { .. } => "SET_ROW",
            Self::Pause { .. } => "PAUSE",
            Self::SaveTracks => "SAVE_TRACKS",
        }
    }

    /// Serialize to a standalone byte buffer.
    pub fn encode(&self, dialect: WireDialect) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf, dialect);
        buf
    }

    pub fn write_to<W: Write>(&self, writer: &mut W, dialect: WireDialect) -> io::Result<()> {
        writer.write_u8(self.command_byte())?;
        match self {
            Self::SetKey { track, key } => {
                writer.write_u32::<BigEndian>(*track)?;
                writer.write_u32::<BigEndian>(key.row)?;
                writer.write_u32::<BigEndian>(key.value.to_bits())?;
                writer.write_u8(key.interpolation.as_u8())?;
            }
            Self::DeleteKey { track, row } => {
                writer.write_u32::<BigEndian>(*track)?;
                writer.write_u32::<BigEndian>(*row)?;
            }
            Self::GetTrack { index, name } => {
                if dialect == WireDialect::Indexed {
                    writer.write_u32::<BigEndian>(index.unwrap_or_default())?;
                }
                writer.write_u32::<BigEndian>(name.len() as u32)?;
                writer.write_all(name.as_bytes())?;
            }
            Self::SetRow { row } => writer.write_u32::<BigEndian>(*row)?,
            Self::Pause { paused } => writer.write_u8(u8::from(*paused))?,
            Self::SaveTracks => {}
        }
        Ok(())
    }

    /// Read exactly one command.
    ///
    /// Blocks until the whole command has arrived. Every malformed input is
    /// an error; there is no resynchronisation within a stream.
    pub fn decode<R: Read>(reader: &mut R, dialect: WireDialect) -> Result<Self, DecodeError> {
        let command = reader.read_u8()?;
        match command {
            CMD_SET_KEY => {
                let track = reader.read_u32::<BigEndian>()?;
                let row = reader.read_u32::<BigEndian>()?;
                let value = f32::from_bits(reader.read_u32::<BigEndian>()?);
                let raw = reader.read_u8()?;
                let interpolation =
                    Interpolation::from_u8(raw).ok_or(DecodeError::InvalidInterpolation(raw))?;
                Ok(Self::SetKey {
                    track,
                    key: KeyFrame::new(row, value, interpolation),
                })
            }
            CMD_DELETE_KEY => {
                let track = reader.read_u32::<BigEndian>()?;
                let row = reader.read_u32::<BigEndian>()?;
                Ok(Self::DeleteKey { track, row })
            }
            CMD_GET_TRACK => {
                let index = match dialect {
                    WireDialect::Indexed => Some(reader.read_u32::<BigEndian>()?),
                    WireDialect::Standard => None,
                };
                let name = read_track_name(reader)?;
                Ok(Self::GetTrack { index, name })
            }
            CMD_SET_ROW => Ok(Self::SetRow {
                row: reader.read_u32::<BigEndian>()?,
            }),
            CMD_PAUSE => Ok(Self::Pause {
                paused: reader.read_u8()? != 0,
            }),
            CMD_SAVE_TRACKS => Ok(Self::SaveTracks),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

fn read_track_name<R: Read>(reader: &mut R) -> Result<String, DecodeError> {
    let len = reader.read_u32::<BigEndian>()?;
    if len == 0 {
        return Err(DecodeError::EmptyTrackName);
    }
    if len > MAX_TRACK_NAME_LEN {
        return Err(DecodeError::TrackNameTooLong(len));
    }

    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    if bytes.contains(&0) {
        return Err(DecodeError::NameContainsNul);
    }
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(cmd: SyncCommand, dialect: WireDialect) -> SyncCommand {
        let bytes = cmd.encode(dialect);
        let mut cursor = Cursor::new(bytes);
        let decoded = SyncCommand::decode(&mut cursor, dialect).unwrap();
        assert_eq!(cursor.position() as usize, cursor.get_ref().len(), "trailing bytes");
        decoded
    }

    #[test]
    fn test_roundtrip_all_commands() {
        let commands = [
            SyncCommand::SetKey {
                track: 3,
                key: KeyFrame::new(128, -0.25, Interpolation::Smooth),
            },
            SyncCommand::DeleteKey { track: 1, row: 9 },
            SyncCommand::GetTrack {
                index: None,
                name: "camera:rot.y".to_string(),
            },
            SyncCommand::SetRow { row: 0xDEAD },
            SyncCommand::Pause { paused: true },
            SyncCommand::Pause { paused: false },
            SyncCommand::SaveTracks,
        ];
        for cmd in commands {
            assert_eq!(roundtrip(cmd.clone(), WireDialect::Standard), cmd);
        }
    }

    #[test]
    fn test_roundtrip_indexed_get_track() {
        let cmd = SyncCommand::GetTrack {
            index: Some(17),
            name: "fx.x".to_string(),
        };
        assert_eq!(roundtrip(cmd.clone(), WireDialect::Indexed), cmd);
    }

    #[test]
    fn test_set_key_layout() {
        let cmd = SyncCommand::SetKey {
            track: 1,
            key: KeyFrame::new(2, 1.0, Interpolation::Linear),
        };
        let mut expected = vec![0, 0, 0, 0, 1, 0, 0, 0, 2];
        expected.extend_from_slice(&1.0f32.to_bits().to_be_bytes());
        expected.push(1);
        assert_eq!(cmd.encode(WireDialect::Standard), expected);
    }

    #[test]
    fn test_get_track_layouts() {
        let cmd = SyncCommand::GetTrack {
            index: Some(5),
            name: "ab".to_string(),
        };
        assert_eq!(cmd.encode(WireDialect::Standard), vec![2, 0, 0, 0, 2, b'a', b'b']);
        assert_eq!(
            cmd.encode(WireDialect::Indexed),
            vec![2, 0, 0, 0, 5, 0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_pause_nonzero_flag_is_paused() {
        let decoded = SyncCommand::decode(&mut Cursor::new(vec![4, 7]), WireDialect::Standard);
        assert_eq!(decoded.unwrap(), SyncCommand::Pause { paused: true });
    }

    #[test]
    fn test_unknown_command() {
        let err = SyncCommand::decode(&mut Cursor::new(vec![6]), WireDialect::Standard).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand(6)));
    }

    #[test]
    fn test_invalid_interpolation() {
        let mut bytes = vec![0; 13];
        bytes.push(4);
        let err = SyncCommand::decode(&mut Cursor::new(bytes), WireDialect::Standard).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidInterpolation(4)));
    }

    #[test]
    fn test_truncated_payload() {
        let err = SyncCommand::decode(&mut Cursor::new(vec![1, 0, 0]), WireDialect::Standard)
            .unwrap_err();
        match err {
            DecodeError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected io error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_track_names() {
        let decode = |bytes: Vec<u8>| SyncCommand::decode(&mut Cursor::new(bytes), WireDialect::Standard);

        assert!(matches!(decode(vec![2, 0, 0, 0, 0]), Err(DecodeError::EmptyTrackName)));
        assert!(matches!(
            decode(vec![2, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(DecodeError::TrackNameTooLong(0xFFFF_FFFF))
        ));
        assert!(matches!(
            decode(vec![2, 0, 0, 0, 3, b'a', 0, b'b']),
            Err(DecodeError::NameContainsNul)
        ));
        assert!(matches!(
            decode(vec![2, 0, 0, 0, 2, 0xC3, 0x28]),
            Err(DecodeError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_name_overrunning_stream() {
        let err = SyncCommand::decode(&mut Cursor::new(vec![2, 0, 0, 0, 9, b'x']), WireDialect::Standard)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn test_decode_sequence() {
        let mut bytes = SyncCommand::SetRow { row: 1 }.encode(WireDialect::Standard);
        bytes.extend(SyncCommand::SaveTracks.encode(WireDialect::Standard));
        let mut cursor = Cursor::new(bytes);
        assert_eq!(
            SyncCommand::decode(&mut cursor, WireDialect::Standard).unwrap(),
            SyncCommand::SetRow { row: 1 }
        );
        assert_eq!(
            SyncCommand::decode(&mut cursor, WireDialect::Standard).unwrap(),
            SyncCommand::SaveTracks
        );
    }
}
