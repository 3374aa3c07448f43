use async_trait::async_trait;
use log::{debug, warn};
use tokio::time::timeout;

use super::factory::{self, AudioCodec};
use super::handshake::{Session, SessionParams, Step};
use super::message::{Message, MAX_PAYLOAD_SIZE};
use crate::error::{Error, Result};
use crate::source::{
    Source, SourceConfig, SourceCore, CONTENT_TYPE, ICY_GENRE, ICY_NAME, ICY_PUB, ICY_URL,
};

/// Settings specific to the Ultravox2 broadcaster handshake.
#[derive(Debug, Clone)]
pub struct UltravoxConfig {
    /// Stream id on the server.
    pub sid: String,
    /// User id, enciphered before it is sent.
    pub uid: String,
    /// Proposed server-side buffer, in kilobytes.
    pub buffer_size: u32,
    /// Proposed largest frame payload.
    pub max_payload: u32,
}

impl Default for UltravoxConfig {
    fn default() -> Self {
        Self {
            sid: "1".to_string(),
            uid: String::new(),
            buffer_size: 320,
            max_payload: 4096,
        }
    }
}

/// Source for SHOUTcast v2 servers speaking Ultravox2.
///
/// Audio goes out wrapped in data frames and metadata as chunked XML frames,
/// both through the shared throttle.
pub struct UltravoxSource {
    core: SourceCore,
    ultravox: UltravoxConfig,
    codec: AudioCodec,
    max_payload: usize,
}

impl UltravoxSource {
    pub fn new(config: SourceConfig, ultravox: UltravoxConfig) -> Self {
        Self {
            core: SourceCore::new(config),
            max_payload: clamp_payload(ultravox.max_payload),
            ultravox,
            codec: AudioCodec::Mp3,
        }
    }

    /// Largest data frame payload; the negotiated value once connected.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn session_params(&self) -> SessionParams {
        let info = |key: &str| self.core.stream_info_value(key).unwrap_or("").to_string();
        let config = self.core.config();

        SessionParams {
            sid: self.ultravox.sid.clone(),
            uid: self.ultravox.uid.clone(),
            password: config.password.clone(),
            mime: info(CONTENT_TYPE),
            kbps: config.kbps,
            buffer_size: self.ultravox.buffer_size,
            max_payload: self.ultravox.max_payload,
            genre: info(ICY_GENRE),
            name: info(ICY_NAME),
            public: info(ICY_PUB) == "1",
            url: info(ICY_URL),
        }
    }

    async fn send_message(&mut self, msg: &Message) -> Result<()> {
        self.core.send(&msg.encode()).await
    }

    async fn read_message(&mut self) -> Result<Message> {
        let limit = self.core.config().timeout;
        let conn = self.core.connection()?;
        timeout(limit, Message::read(conn))
            .await
            .map_err(|_| Error::timed_out("read"))?
    }

    async fn write_message(&mut self, msg: Result<Message>) {
        match msg {
            Ok(msg) => self.core.write_throttled(&msg.encode()).await,
            Err(e) => warn!("Dropping frame: {}", e),
        }
    }
}

fn clamp_payload(value: u32) -> usize {
    (value as usize).clamp(factory::METADATA_CHUNK_HEADER_SIZE + 1, MAX_PAYLOAD_SIZE)
}

#[async_trait]
impl Source for UltravoxSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    async fn handshake(&mut self) -> Result<()> {
        let params = self.session_params();
        self.codec = AudioCodec::from_mime(&params.mime);

        let mut session = Session::new(params);
        let request = session.start()?;
        self.send_message(&request).await?;

        loop {
            let msg = self.read_message().await?;
            match session.on_message(&msg)? {
                Step::Send(reply) => self.send_message(&reply).await?,
                Step::Ignore => continue,
                Step::Done => break,
            }
        }

        self.max_payload = clamp_payload(session.max_payload());
        debug!(
            "Ultravox stream ready ({:?}, max payload {})",
            self.codec, self.max_payload
        );
        Ok(())
    }

    /// Wrap `data` in data frames of at most the negotiated payload size.
    async fn write(&mut self, data: &[u8]) {
        if !self.core.is_started() {
            return;
        }

        for chunk in data.chunks(self.max_payload) {
            let frame = factory::data(self.codec, chunk);
            self.write_message(frame).await;
            if !self.core.is_started() {
                break;
            }
        }
    }

    async fn update_metadata(&mut self, song: &str, artist: &str, album: &str) {
        if !self.core.is_started() {
            return;
        }

        let frames = match factory::metadata(song, artist, album, self.max_payload) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Could not build metadata frames: {}", e);
                return;
            }
        };
        for frame in frames {
            self.write_message(Ok(frame)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_params_follow_stream_info() {
        let mut source = UltravoxSource::new(
            SourceConfig::new(128, 0).with_credentials("", "secret"),
            UltravoxConfig {
                sid: "2".into(),
                uid: "1".into(),
                ..UltravoxConfig::default()
            },
        );
        source.set_stream_info(ICY_PUB, "1");
        source.set_stream_info(ICY_NAME, "Test FM");

        let params = source.session_params();
        assert!(params.public);
        assert_eq!(params.name, "Test FM");
        assert_eq!(params.mime, "audio/mpeg");
        assert_eq!(params.password, "secret");
        assert_eq!(params.sid, "2");
    }

    #[test]
    fn test_max_payload_is_clamped() {
        assert_eq!(clamp_payload(0), 7);
        assert_eq!(clamp_payload(4096), 4096);
        assert_eq!(clamp_payload(1_000_000), MAX_PAYLOAD_SIZE);
    }
}
