use async_trait::async_trait;
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::metadata::{render_song, MetadataRequest};
use crate::source::{Source, SourceConfig, SourceCore, USER_AGENT};

const EOL: &str = "\n";

/// Source for SHOUTcast v1 style servers: a bare password line, then ICY
/// headers once the server says OK.
pub struct LegacySource {
    core: SourceCore,
}

impl LegacySource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            core: SourceCore::new(config),
        }
    }

    /// The `/admin.cgi` request a metadata update would send, or `None` when
    /// not started.
    pub fn metadata_request(&self, song: &str, artist: &str, album: &str) -> Option<MetadataRequest> {
        if !self.core.is_started() {
            return None;
        }

        let config = self.core.config();
        let request = MetadataRequest::new(&config.host, config.port, "/admin.cgi")
            .param("mode", "updinfo")
            .param("charset", "UTF-8")
            .param("song", &render_song(song, artist, album))
            .param("pass", &config.password)
            .header("User-Agent", USER_AGENT);
        Some(request)
    }
}

#[async_trait]
impl Source for LegacySource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        &mut self.core
    }

    async fn handshake(&mut self) -> Result<()> {
        let password = format!("{}{EOL}", self.core.config().password);
        self.core.send(password.as_bytes()).await?;

        let line = self.core.read_line().await?.ok_or_else(Error::closed)?;
        if !line.contains("OK") {
            return Err(Error::Protocol(format!("server refused password: {line}")));
        }
        debug!("Password accepted: {}", line);

        // The server follows up with a banner terminated by an empty line.
        while let Some(banner) = self.core.read_line().await? {
            if banner.is_empty() {
                break;
            }
            trace!("Ignoring server header: {}", banner);
        }

        let mut headers = self.core.stream_info_headers(EOL);
        headers.push_str(EOL);
        self.core.send(headers.as_bytes()).await
    }

    async fn update_metadata(&mut self, song: &str, artist: &str, album: &str) {
        let Some(request) = self.metadata_request(song, artist, album) else {
            return;
        };
        if let Err(e) = request.send(self.core.config().timeout).await {
            warn!("SHOUTcast metadata update failed: {}", e);
        }
    }
}
