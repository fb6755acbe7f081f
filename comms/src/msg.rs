use std::io;

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{
    Deserialize, Serialize,
    specs::{DeviceId, Event, TaskReceipt, TaskSubmission},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const DATA_KIND: Header = 2;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, Clone, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Enqueue a task for a device (consumer -> broker).
    Submit(TaskSubmission),
    /// The broker accepted a submission (broker -> consumer).
    Accepted(TaskReceipt),
    /// Devices that answered a `ListDevices` query (broker -> consumer).
    Devices(Vec<DeviceId>),
    /// An inbound notification on a subscription stream (broker -> consumer).
    Event(Event),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Subscribe { consumer_id: u64 },
    Unsubscribe,
    ListDevices { freshness_secs: u64 },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, Clone)]
pub enum Msg {
    Control(Command),
    Data(Payload),
    Err(String),
}

impl Msg {
    /// Returns a short, human readable name for the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Submit(_)) => "data/submit",
            Msg::Data(Payload::Accepted(_)) => "data/accepted",
            Msg::Data(Payload::Devices(_)) => "data/devices",
            Msg::Data(Payload::Event(_)) => "data/event",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());
                write_json(buf, cmd);
                None
            }
            Msg::Data(payload) => {
                buf.extend_from_slice(&DATA_KIND.to_be_bytes());
                write_json(buf, payload);
                None
            }
        }
    }
}

/// Appends the json encoding of `value` to `buf`.
///
/// Encoding derived wire types into a `Vec` can't fail.
fn write_json<T: SerdeSerialize>(buf: &mut Vec<u8>, value: &T) {
    if let Err(e) = serde_json::to_writer(buf, value) {
        unreachable!("wire types always serialize: {e}");
    }
}

impl<'a> Deserialize<'a> for Msg {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);

        match Header::from_be_bytes(header) {
            ERR_KIND => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(string.to_string()))
            }
            CONTROL_KIND => Ok(Self::Control(serde_json::from_slice(rest)?)),
            DATA_KIND => Ok(Self::Data(serde_json::from_slice(rest)?)),
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::{DeviceStatus, LivenessEvent};

    fn encode(msg: &Msg) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(tail) = msg.serialize(&mut buf) {
            buf.extend_from_slice(tail);
        }
        buf
    }

    #[test]
    fn err_text_is_sent_verbatim() {
        let msg = Msg::Err("broker unavailable".into());
        let buf = encode(&msg);
        assert_eq!(&buf[HEADER_SIZE..], b"broker unavailable");

        let Msg::Err(text) = Msg::deserialize(&buf).unwrap() else {
            panic!("expected an err message");
        };
        assert_eq!(text, "broker unavailable");
    }

    #[test]
    fn liveness_event_decodes() {
        let event = Event::Liveness(LivenessEvent {
            device_id: DeviceId(7),
            status: DeviceStatus::Unavailable,
        });
        let buf = encode(&Msg::Data(Payload::Event(event)));

        match Msg::deserialize(&buf).unwrap() {
            Msg::Data(Payload::Event(Event::Liveness(ev))) => {
                assert_eq!(ev.device_id, DeviceId(7));
                assert_eq!(ev.status, DeviceStatus::Unavailable);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn rejects_short_and_unknown_frames() {
        assert!(Msg::deserialize(&[0, 0]).is_err());
        assert!(Msg::deserialize(&9u32.to_be_bytes()).is_err());
    }
}
