use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// First byte of every frame.
pub const SYNC: u8 = 0x5A;

/// Sync, QoS, class/type (2 bytes) and payload length (2 bytes).
pub const HEADER_SIZE: usize = 6;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Protocol version announced in the cipher request and expected back on auth.
pub const PROTOCOL_VERSION: &str = "2.1";

const TRAILER: u8 = 0x00;

/// The 4-bit message class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageClass {
    Operations = 0x0,
    Broadcaster = 0x1,
    Listener = 0x2,
    CacheableMetadata1 = 0x3,
    CacheableMetadata2 = 0x4,
    PassThroughMetadata1 = 0x5,
    PassThroughMetadata2 = 0x6,
    Data1 = 0x7,
    Data2 = 0x8,
    FramedData = 0x9,
    CacheableBinaryMetadata = 0xA,
}

impl MessageClass {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        let class = match nibble {
            0x0 => Self::Operations,
            0x1 => Self::Broadcaster,
            0x2 => Self::Listener,
            0x3 => Self::CacheableMetadata1,
            0x4 => Self::CacheableMetadata2,
            0x5 => Self::PassThroughMetadata1,
            0x6 => Self::PassThroughMetadata2,
            0x7 => Self::Data1,
            0x8 => Self::Data2,
            0x9 => Self::FramedData,
            0xA => Self::CacheableBinaryMetadata,
            _ => return None,
        };
        Some(class)
    }

    pub fn nibble(self) -> u8 {
        self as u8
    }
}

/// The 12-bit message type. Its meaning is scoped to the class it travels with,
/// so the same raw value appears under several names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType(u16);

impl MessageType {
    // Broadcaster class
    pub const BROADCAST_ND: Self = Self(0x000);
    pub const BROADCAST_AUTHENTICATE: Self = Self(0x001);
    pub const BROADCAST_SETUP: Self = Self(0x002);
    pub const BROADCAST_NEGOTIATE_BUFFER_SIZE: Self = Self(0x003);
    pub const BROADCAST_STANDBY: Self = Self(0x004);
    pub const BROADCAST_TERMINATE: Self = Self(0x005);
    pub const BROADCAST_FLUSH_CACHEABLE_DATA: Self = Self(0x006);
    pub const BROADCAST_REQUIRE_LISTENER_AUTH: Self = Self(0x007);
    pub const BROADCAST_NEGOTIATE_MAX_PAYLOAD: Self = Self(0x008);
    pub const BROADCAST_REQUEST_CIPHER: Self = Self(0x009);
    pub const BROADCAST_STREAM_MIME_TYPE: Self = Self(0x040);
    pub const BROADCAST_FILE_TRANSFER_BEGIN: Self = Self(0x050);
    pub const BROADCAST_FILE_TRANSFER_DATA: Self = Self(0x051);
    pub const BROADCAST_CONFIGURE_ICY_NAME: Self = Self(0x100);
    pub const BROADCAST_CONFIGURE_ICY_GENRE: Self = Self(0x101);
    pub const BROADCAST_CONFIGURE_ICY_URL: Self = Self(0x102);
    pub const BROADCAST_CONFIGURE_ICY_PUB: Self = Self(0x103);

    // Listener class
    pub const LISTENER_TEMPORARY_BROADCAST_INTERRUPTION: Self = Self(0x001);
    pub const LISTENER_BROADCAST_TERMINATION: Self = Self(0x002);

    // Cacheable metadata class 1
    pub const METADATA_XML_AOL: Self = Self(0x901);
    pub const METADATA_XML_SHOUTCAST: Self = Self(0x902);

    // Data classes
    pub const DATA1_MP3: Self = Self(0x000);
    pub const DATA2_VLB: Self = Self(0x000);
    pub const DATA2_AAC_LC: Self = Self(0x001);
    pub const DATA2_AACP: Self = Self(0x003);

    /// Accepts any value that fits in 12 bits.
    pub fn from_raw(raw: u16) -> Option<Self> {
        (raw <= 0x0FFF).then_some(Self(raw))
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

/// A single Ultravox2 frame.
///
/// Encoded as a 6-byte header, the payload and one trailing zero byte:
///
/// ```text
/// +------+-----+------------+------+---------+---------+---------+------+
/// | 0x5A | QoS | class|type | type | len(hi) | len(lo) | payload | 0x00 |
/// +------+-----+------------+------+---------+---------+---------+------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    class: MessageClass,
    msg_type: MessageType,
    payload: Bytes,
}

impl Message {
    /// Build a frame, rejecting payloads the length field cannot carry.
    pub fn new(class: MessageClass, msg_type: MessageType, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::Framing(format!(
                "payload of {} bytes exceeds {} byte limit",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(Self {
            class,
            msg_type,
            payload,
        })
    }

    pub fn class(&self) -> MessageClass {
        self.class
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Size of the frame on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + 1
    }

    /// Serialise the frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        let raw_type = self.msg_type.raw();

        buf.put_u8(SYNC);
        buf.put_u8(0);
        buf.put_u8((self.class.nibble() << 4) | ((raw_type >> 8) as u8 & 0x0F));
        buf.put_u8((raw_type & 0xFF) as u8);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        buf.put_u8(TRAILER);

        buf.freeze()
    }

    /// Decode the first frame held in `buf`. Bytes past the frame are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header: &[u8; HEADER_SIZE] = buf
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| Error::Framing(format!("truncated header ({} bytes)", buf.len())))?;
        let (class, msg_type, len) = parse_header(header)?;

        let end = HEADER_SIZE + len;
        if buf.len() < end + 1 {
            return Err(Error::Framing(format!(
                "truncated frame: need {} bytes, have {}",
                end + 1,
                buf.len()
            )));
        }
        check_trailer(buf[end])?;

        Ok(Self {
            class,
            msg_type,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..end]),
        })
    }

    /// Read exactly one frame from `reader`.
    ///
    /// A stream that ends mid-frame is a framing error, not a retry condition.
    pub async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_SIZE];
        read_exact(reader, &mut header, "header").await?;
        let (class, msg_type, len) = parse_header(&header)?;

        let mut payload = vec![0u8; len];
        read_exact(reader, &mut payload, "payload").await?;

        let mut trailer = [0u8; 1];
        read_exact(reader, &mut trailer, "trailer").await?;
        check_trailer(trailer[0])?;

        Ok(Self {
            class,
            msg_type,
            payload: Bytes::from(payload),
        })
    }
}

fn parse_header(header: &[u8; HEADER_SIZE]) -> Result<(MessageClass, MessageType, usize)> {
    if header[0] != SYNC {
        return Err(Error::Framing(format!("bad sync byte {:#04x}", header[0])));
    }

    let class = MessageClass::from_nibble(header[2] >> 4)
        .ok_or_else(|| Error::Framing(format!("unknown message class {:#x}", header[2] >> 4)))?;
    let msg_type = MessageType((u16::from(header[2] & 0x0F) << 8) | u16::from(header[3]));
    let len = usize::from(u16::from_be_bytes([header[4], header[5]]));

    Ok((class, msg_type, len))
}

fn check_trailer(byte: u8) -> Result<()> {
    if byte != TRAILER {
        return Err(Error::Framing(format!("bad trailing byte {byte:#04x}")));
    }
    Ok(())
}

async fn read_exact<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    part: &str,
) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::Framing(format!("short read in frame {part}")))
        }
        Err(e) => Err(Error::Transport(e)),
    }
}
