use std::io;

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const SEQ_SIZE: usize = size_of::<u64>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A numeric vector taking part in a reduction.
    Values { seq: u64, values: Vec<f32> },
    /// An opaque serialized value contributed by `rank` to a gather.
    Blob { seq: u64, rank: usize, bytes: Vec<u8> },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Hello { rank: usize, world_size: usize },
    Barrier { seq: u64 },
    Disconnect,
}

/// The application layer message exchanged between ranks.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Control(Command),
    Data(Payload),
    Err(String),
}

impl Msg {
    /// A short name of the message kind, used for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Barrier { .. }) => "control/barrier",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Values { .. }) => "data/values",
            Msg::Data(Payload::Blob { .. }) => "data/blob",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

fn read_u64(buf: &[u8]) -> io::Result<(u64, &[u8])> {
    if buf.len() < SEQ_SIZE {
        return Msg::buf_is_too_small(buf.len(), SEQ_SIZE);
    }

    let (head, rest) = buf.split_at(SEQ_SIZE);
    let mut bytes = [0; SEQ_SIZE];
    bytes.copy_from_slice(head);
    Ok((u64::from_be_bytes(bytes), rest))
}

impl Serialize for Msg {
    fn serialize<'a>(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        let tail = match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&(0 as Header).to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&(1 as Header).to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                None
            }
            Msg::Data(Payload::Values { seq, values }) => {
                buf.extend_from_slice(&(2 as Header).to_be_bytes());
                buf.extend_from_slice(&seq.to_be_bytes());
                Some(bytemuck::cast_slice(values.as_slice()))
            }
            Msg::Data(Payload::Blob { seq, rank, bytes }) => {
                buf.extend_from_slice(&(3 as Header).to_be_bytes());
                buf.extend_from_slice(&seq.to_be_bytes());
                buf.extend_from_slice(&(*rank as u64).to_be_bytes());
                Some(bytes.as_slice())
            }
        };

        Ok(tail)
    }
}

impl Deserialize for Msg {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len(), HEADER_SIZE);
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            0 => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(string.to_string()))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2 => {
                let (seq, nums) = read_u64(rest)?;

                if nums.len() % size_of::<f32>() != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("values payload of {} bytes is not a whole number of f32", nums.len()),
                    ));
                }

                let values = bytemuck::pod_collect_to_vec(nums);
                Ok(Self::Data(Payload::Values { seq, values }))
            }
            3 => {
                let (seq, rest) = read_u64(rest)?;
                let (rank, bytes) = read_u64(rest)?;

                Ok(Self::Data(Payload::Blob {
                    seq,
                    rank: rank as usize,
                    bytes: bytes.to_vec(),
                }))
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}
