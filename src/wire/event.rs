// src/wire/event.rs
// =============================================================================
// The four messages crawler nodes exchange, and their binary encoding.
//
// Payload layout (the frame length prefix is added by transport.rs):
//   [i32 BE event tag][u32 BE len][bytes]...
//
// Field order per event:
//   TaskForward    = url, origin
//   TaskComplete   = domain
//   NodeFinished   = domain
//   NodeIncomplete = domain
//
// Decoding is a plain function over the payload bytes. There is no factory
// object and no shared state.
// =============================================================================

use std::fmt;

use super::WireError;

pub const TASK_COMPLETE: i32 = 1;
pub const TASK_FORWARD: i32 = 2;
pub const NODE_FINISHED: i32 = 3;
pub const NODE_INCOMPLETE: i32 = 4;

/// A message sent between crawler nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Asks the receiving node to crawl `url`. `origin` is the domain key of
    /// the sending node, which expects a `TaskComplete` back.
    TaskForward { url: String, origin: String },
    /// The node owning `domain` finished a task the receiver forwarded to it.
    TaskComplete { domain: String },
    /// The node owning `domain` has no local work and balanced counters.
    NodeFinished { domain: String },
    /// The node owning `domain` received new work and revokes `NodeFinished`.
    NodeIncomplete { domain: String },
}

impl Event {
    pub fn tag(&self) -> i32 {
        match self {
            Event::TaskComplete { .. } => TASK_COMPLETE,
            Event::TaskForward { .. } => TASK_FORWARD,
            Event::NodeFinished { .. } => NODE_FINISHED,
            Event::NodeIncomplete { .. } => NODE_INCOMPLETE,
        }
    }

    // The domain key of the node that sent this event
    pub fn sender(&self) -> &str {
        match self {
            Event::TaskForward { origin, .. } => origin,
            Event::TaskComplete { domain }
            | Event::NodeFinished { domain }
            | Event::NodeIncomplete { domain } => domain,
        }
    }

    /// Serializes the event into a frame payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.tag().to_be_bytes());

        match self {
            Event::TaskForward { url, origin } => {
                put_field(&mut buf, url);
                put_field(&mut buf, origin);
            }
            Event::TaskComplete { domain }
            | Event::NodeFinished { domain }
            | Event::NodeIncomplete { domain } => put_field(&mut buf, domain),
        }

        buf
    }

    /// Parses a frame payload back into an event.
    ///
    /// Fails on an unknown tag, a field running past the end of the payload,
    /// bytes left over after the last field, or a field that is not UTF-8.
    pub fn decode(payload: &[u8]) -> Result<Event, WireError> {
        let mut reader = FieldReader::new(payload);
        let tag = reader.read_i32()?;

        let event = match tag {
            TASK_FORWARD => Event::TaskForward {
                url: reader.read_string()?,
                origin: reader.read_string()?,
            },
            TASK_COMPLETE => Event::TaskComplete {
                domain: reader.read_string()?,
            },
            NODE_FINISHED => Event::NodeFinished {
                domain: reader.read_string()?,
            },
            NODE_INCOMPLETE => Event::NodeIncomplete {
                domain: reader.read_string()?,
            },
            other => return Err(WireError::UnknownTag(other)),
        };

        reader.finish()?;
        Ok(event)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::TaskForward { url, origin } => write!(f, "TaskForward({} from {})", url, origin),
            Event::TaskComplete { domain } => write!(f, "TaskComplete({})", domain),
            Event::NodeFinished { domain } => write!(f, "NodeFinished({})", domain),
            Event::NodeIncomplete { domain } => write!(f, "NodeIncomplete({})", domain),
        }
    }
}

fn put_field(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

// Cursor over a payload that bounds-checks every read
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        FieldReader { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(WireError::Truncated {
                wanted: len,
                available: self.data.len() - self.pos,
            })?;

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32, WireError> {
        Ok(self.read_u32()? as i32)
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    fn finish(self) -> Result<(), WireError> {
        let left = self.data.len() - self.pos;
        if left == 0 {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(left))
        }
    }
}
