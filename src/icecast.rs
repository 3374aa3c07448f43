use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::metadata::{render_song, MetadataRequest};
use crate::source::{Source, SourceConfig, SourceCore, USER_AGENT};

const EOL: &str = "\r\n";

/// Source for Icecast servers, using the HTTP/1.0 `SOURCE` handshake.
pub struct IcecastSource {
    core: SourceCore,
}

impl IcecastSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            core: SourceCore::new(config),
        }
    }

    fn basic_auth(&self) -> String {
        let config = self.core.config();
        let token = STANDARD.encode(format!("{}:{}", config.username, config.password));
        format!("Basic {token}")
    }

    /// The exact bytes of the `SOURCE` request.
    pub fn handshake_request(&self) -> String {
        let mut request = format!("SOURCE {} HTTP/1.0{EOL}", self.core.config().mount);
        request.push_str(&format!("Authorization: {}{EOL}", self.basic_auth()));
        request.push_str(&format!("User-Agent: {USER_AGENT}{EOL}"));
        request.push_str(&format!("icy-notice1: {USER_AGENT}{EOL}"));
        request.push_str(&self.core.stream_info_headers(EOL));
        request.push_str(EOL);
        request
    }

    /// The `/admin/metadata` request a metadata update would send, or `None`
    /// when not started.
    pub fn metadata_request(&self, song: &str, artist: &str, album: &str) -> Option<MetadataRequest> {
        if !self.core.is_started() {
            return None;
        }

        let config = self.core.config();
        let request = MetadataRequest::new(&config.host, config.port, "/admin/metadata")
            .param("mode", "updinfo")
            .param("mount", &config.mount)
            .param("charset", "UTF-8")
            .param("song", &render_song(song, artist, album))
            .header("Authorization", &self.basic_auth())
            .header("User-Agent", USER_AGENT);
        Some(request)
    }
}

#[async_trait]
impl Source for IcecastSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    async fn handshake(&mut self) -> Result<()> {
        let request = self.handshake_request();
        debug!("Sending SOURCE request for {}", self.core.config().mount);
        self.core.send(request.as_bytes()).await?;

        let line = self.core.read_line().await?.ok_or_else(Error::closed)?;
        if line.contains("HTTP") && line.contains("OK") {
            debug!("Icecast accepted source: {}", line);
            Ok(())
        } else {
            Err(Error::Protocol(format!("server refused source: {line}")))
        }
    }

    async fn update_metadata(&mut self, song: &str, artist: &str, album: &str) {
        let Some(request) = self.metadata_request(song, artist, album) else {
            return;
        };
        if let Err(e) = request.send(self.core.config().timeout).await {
            warn!("Icecast metadata update failed: {}", e);
        }
    }
}
