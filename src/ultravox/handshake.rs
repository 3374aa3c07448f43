use log::{debug, trace};

use super::factory;
use super::message::{Message, MessageClass, MessageType, PROTOCOL_VERSION};
use crate::error::{Error, Result};

/// Where a broadcaster handshake stands. Each stage after `Init` means the
/// request for that step has been sent and its acknowledgement is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    Init,
    CipherRequested,
    Authenticating,
    MimeNegotiated,
    SetupNegotiated,
    BufferNegotiated,
    PayloadNegotiated,
    GenreConfigured,
    NameConfigured,
    PubConfigured,
    UrlConfigured,
    StandbyRequested,
    Streaming,
}

impl HandshakeStage {
    /// Type of the acknowledgement that moves this stage forward.
    pub fn awaiting(self) -> Option<MessageType> {
        let msg_type = match self {
            Self::CipherRequested => MessageType::BROADCAST_REQUEST_CIPHER,
            Self::Authenticating => MessageType::BROADCAST_AUTHENTICATE,
            Self::MimeNegotiated => MessageType::BROADCAST_STREAM_MIME_TYPE,
            Self::SetupNegotiated => MessageType::BROADCAST_SETUP,
            Self::BufferNegotiated => MessageType::BROADCAST_NEGOTIATE_BUFFER_SIZE,
            Self::PayloadNegotiated => MessageType::BROADCAST_NEGOTIATE_MAX_PAYLOAD,
            Self::GenreConfigured => MessageType::BROADCAST_CONFIGURE_ICY_GENRE,
            Self::NameConfigured => MessageType::BROADCAST_CONFIGURE_ICY_NAME,
            Self::PubConfigured => MessageType::BROADCAST_CONFIGURE_ICY_PUB,
            Self::UrlConfigured => MessageType::BROADCAST_CONFIGURE_ICY_URL,
            Self::StandbyRequested => MessageType::BROADCAST_STANDBY,
            Self::Init | Self::Streaming => return None,
        };
        Some(msg_type)
    }
}

/// Everything the handshake sends, captured when the connection attempt starts.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub sid: String,
    pub uid: String,
    pub password: String,
    pub mime: String,
    pub kbps: u32,
    pub buffer_size: u32,
    pub max_payload: u32,
    pub genre: String,
    pub name: String,
    pub public: bool,
    pub url: String,
}

/// What to do after an incoming frame.
#[derive(Debug)]
pub enum Step {
    Send(Message),
    /// Not the acknowledgement being waited for; keep reading.
    Ignore,
    Done,
}

/// Negotiation state for one connection attempt.
#[derive(Debug)]
pub struct Session {
    params: SessionParams,
    stage: HandshakeStage,
    cipher_key: Option<String>,
    buffer_size: u32,
    max_payload: u32,
}

impl Session {
    pub fn new(params: SessionParams) -> Self {
        Self {
            buffer_size: params.buffer_size,
            max_payload: params.max_payload,
            params,
            stage: HandshakeStage::Init,
            cipher_key: None,
        }
    }

    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    /// Key the server handed out for credential encipherment.
    pub fn cipher_key(&self) -> Option<&str> {
        self.cipher_key.as_deref()
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }

    /// The opening cipher request.
    pub fn start(&mut self) -> Result<Message> {
        self.stage = HandshakeStage::CipherRequested;
        factory::cipher_request()
    }

    /// Handle one frame from the server.
    pub fn on_message(&mut self, msg: &Message) -> Result<Step> {
        if msg.class() != MessageClass::Broadcaster {
            return Err(Error::Protocol(format!(
                "unexpected {:?} message during handshake",
                msg.class()
            )));
        }

        let text = String::from_utf8_lossy(msg.payload());
        let fields: Vec<&str> = text.trim().split(':').collect();
        if fields[0] != "ACK" {
            return Err(Error::Protocol(fields[0].to_string()));
        }

        if self.stage.awaiting() != Some(msg.msg_type()) {
            trace!(
                "Ignoring {:#05x} while in {:?}",
                msg.msg_type().raw(),
                self.stage
            );
            return Ok(Step::Ignore);
        }

        let field = |i: usize| fields.get(i).copied().unwrap_or("");
        let p = &self.params;

        let stage = self.stage;
        let (next, reply) = match stage {
            HandshakeStage::CipherRequested => {
                let key = field(1).to_string();
                let reply = factory::auth_request(&p.sid, &p.uid, &p.password, &key)?;
                self.cipher_key = Some(key);
                (HandshakeStage::Authenticating, reply)
            }
            HandshakeStage::Authenticating => {
                if field(1) != PROTOCOL_VERSION {
                    return Err(Error::Protocol(format!("unsupported version {}", field(1))));
                }
                if field(2) != "Allow" {
                    return Err(Error::Protocol(format!("authentication refused: {}", field(2))));
                }
                (HandshakeStage::MimeNegotiated, factory::mime_type(&p.mime)?)
            }
            HandshakeStage::MimeNegotiated => {
                let bps = p.kbps.saturating_mul(1000);
                (HandshakeStage::SetupNegotiated, factory::setup(bps, bps)?)
            }
            HandshakeStage::SetupNegotiated => (
                HandshakeStage::BufferNegotiated,
                factory::negotiate_buffer_size(self.buffer_size, self.buffer_size)?,
            ),
            HandshakeStage::BufferNegotiated => {
                self.buffer_size = negotiated(self.buffer_size, field(1));
                (
                    HandshakeStage::PayloadNegotiated,
                    factory::negotiate_max_payload(self.max_payload, self.max_payload)?,
                )
            }
            HandshakeStage::PayloadNegotiated => {
                self.max_payload = negotiated(self.max_payload, field(1));
                (HandshakeStage::GenreConfigured, factory::icy_genre(&p.genre)?)
            }
            HandshakeStage::GenreConfigured => {
                (HandshakeStage::NameConfigured, factory::icy_name(&p.name)?)
            }
            HandshakeStage::NameConfigured => {
                (HandshakeStage::PubConfigured, factory::icy_pub(p.public)?)
            }
            HandshakeStage::PubConfigured => {
                (HandshakeStage::UrlConfigured, factory::icy_url(&p.url)?)
            }
            HandshakeStage::UrlConfigured => (HandshakeStage::StandbyRequested, factory::standby()?),
            HandshakeStage::StandbyRequested => {
                if field(1) != "Data transfer mode" {
                    return Err(Error::Protocol(format!("standby refused: {}", field(1))));
                }
                self.stage = HandshakeStage::Streaming;
                debug!(
                    "Handshake complete: buffer {} max payload {}",
                    self.buffer_size, self.max_payload
                );
                return Ok(Step::Done);
            }
            HandshakeStage::Init | HandshakeStage::Streaming => return Ok(Step::Ignore),
        };

        debug!("{:?} acknowledged, now {:?}", stage, next);
        self.stage = next;
        Ok(Step::Send(reply))
    }
}

/// The smaller of what we proposed and a numeric value echoed by the server.
fn negotiated(proposed: u32, echoed: &str) -> u32 {
    match echoed.trim().parse::<u32>() {
        Ok(value) if value > 0 => proposed.min(value),
        _ => proposed,
    }
}
