use bytes::{BufMut, BytesMut};
use rand::Rng;

use super::message::{Message, MessageClass, MessageType, PROTOCOL_VERSION};
use super::xtea;
use crate::error::{Error, Result};
use crate::source::USER_AGENT;

/// Size of the id/span/index prefix on each metadata chunk.
pub const METADATA_CHUNK_HEADER_SIZE: usize = 6;

/// Audio codec carried in data frames, which picks the frame class and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Mp3,
    AacLc,
    AacPlus,
}

impl AudioCodec {
    /// Codec for a stream content type. Unknown types are sent as MP3 frames.
    pub fn from_mime(mime: &str) -> Self {
        match mime.trim().to_ascii_lowercase().as_str() {
            "audio/aacp" => Self::AacPlus,
            "audio/aac" => Self::AacLc,
            _ => Self::Mp3,
        }
    }

    pub fn class_and_type(self) -> (MessageClass, MessageType) {
        match self {
            Self::Mp3 => (MessageClass::Data1, MessageType::DATA1_MP3),
            Self::AacLc => (MessageClass::Data2, MessageType::DATA2_AAC_LC),
            Self::AacPlus => (MessageClass::Data2, MessageType::DATA2_AACP),
        }
    }
}

fn broadcaster(msg_type: MessageType, payload: impl Into<bytes::Bytes>) -> Result<Message> {
    Message::new(MessageClass::Broadcaster, msg_type, payload)
}

fn pair(first: u32, second: u32) -> String {
    format!("{first}:{second}")
}

/// First handshake step: announce the protocol version.
pub fn cipher_request() -> Result<Message> {
    broadcaster(MessageType::BROADCAST_REQUEST_CIPHER, PROTOCOL_VERSION)
}

/// `version:sid:uid:password`, with uid and password enciphered under the
/// key the server returned for the cipher request.
pub fn auth_request(sid: &str, uid: &str, password: &str, cipher_key: &str) -> Result<Message> {
    let uid = xtea::encipher_to_hex(uid.as_bytes(), cipher_key.as_bytes());
    let password = xtea::encipher_to_hex(password.as_bytes(), cipher_key.as_bytes());
    broadcaster(
        MessageType::BROADCAST_AUTHENTICATE,
        format!("{PROTOCOL_VERSION}:{sid}:{uid}:{password}"),
    )
}

pub fn mime_type(mime: &str) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_STREAM_MIME_TYPE, mime.to_string())
}

/// Average and maximum bitrate, in bits per second.
pub fn setup(average: u32, maximum: u32) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_SETUP, pair(average, maximum))
}

pub fn negotiate_buffer_size(desired: u32, minimum: u32) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_NEGOTIATE_BUFFER_SIZE, pair(desired, minimum))
}

pub fn negotiate_max_payload(desired: u32, minimum: u32) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_NEGOTIATE_MAX_PAYLOAD, pair(desired, minimum))
}

pub fn icy_genre(genre: &str) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_CONFIGURE_ICY_GENRE, genre.to_string())
}

pub fn icy_name(name: &str) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_CONFIGURE_ICY_NAME, name.to_string())
}

pub fn icy_pub(public: bool) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_CONFIGURE_ICY_PUB, vec![u8::from(public)])
}

pub fn icy_url(url: &str) -> Result<Message> {
    broadcaster(MessageType::BROADCAST_CONFIGURE_ICY_URL, url.to_string())
}

/// Switch to data transfer. The reference broadcaster sends 0x01 0x30 here
/// and servers expect exactly that.
pub fn standby() -> Result<Message> {
    broadcaster(
        MessageType::BROADCAST_STANDBY,
        bytes::Bytes::from_static(&[0x01, 0x30]),
    )
}

pub fn data(codec: AudioCodec, audio: &[u8]) -> Result<Message> {
    let (class, msg_type) = codec.class_and_type();
    Message::new(class, msg_type, bytes::Bytes::copy_from_slice(audio))
}

/// XML document carried by SHOUTcast metadata messages.
pub fn metadata_xml(song: &str, artist: &str, album: &str) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?><metadata>"#);
    for (tag, value) in [
        ("TIT2", song),
        ("TALB", album),
        ("TPE1", artist),
        ("TENC", USER_AGENT),
    ] {
        xml.push_str(&format!("<{tag}>{}</{tag}>", escape_xml(value)));
    }
    xml.push_str("</metadata>");
    xml
}

/// Metadata update as cacheable metadata frames, each carrying at most
/// `max_payload` bytes including the chunk header.
pub fn metadata(song: &str, artist: &str, album: &str, max_payload: usize) -> Result<Vec<Message>> {
    let id = rand::thread_rng().gen_range(1..=32);
    metadata_chunks(metadata_xml(song, artist, album).as_bytes(), max_payload, id)
}

/// Split `document` into chunks prefixed with `[id][span][index]`, each a
/// big-endian u16, with a 1-based index.
pub fn metadata_chunks(document: &[u8], max_payload: usize, id: u16) -> Result<Vec<Message>> {
    if max_payload <= METADATA_CHUNK_HEADER_SIZE {
        return Err(Error::Validation(format!(
            "max payload {max_payload} leaves no room for metadata"
        )));
    }

    let chunks: Vec<&[u8]> = document
        .chunks(max_payload - METADATA_CHUNK_HEADER_SIZE)
        .collect();
    let span = u16::try_from(chunks.len())
        .map_err(|_| Error::Validation(format!("metadata needs {} chunks", chunks.len())))?;

    chunks
        .iter()
        .zip(1u16..)
        .map(|(chunk, index)| {
            let mut payload = BytesMut::with_capacity(METADATA_CHUNK_HEADER_SIZE + chunk.len());
            payload.put_u16(id);
            payload.put_u16(span);
            payload.put_u16(index);
            payload.put_slice(chunk);
            Message::new(
                MessageClass::CacheableMetadata1,
                MessageType::METADATA_XML_SHOUTCAST,
                payload.freeze(),
            )
        })
        .collect()
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
