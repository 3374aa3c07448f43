use log::debug;
use std::time::Duration;
use url::form_urlencoded;

use crate::error::Result;

/// Song string layout sent by the text protocols.
pub const SONG_TEMPLATE: &str = "_album_ _song_ _artist_";

/// Fill [`SONG_TEMPLATE`], substituting song, then artist, then album.
pub fn render_song(song: &str, artist: &str, album: &str) -> String {
    SONG_TEMPLATE
        .replace("_song_", song)
        .replace("_artist_", artist)
        .replace("_album_", album)
}

/// Form-encode a query component the way legacy SHOUTcast/Icecast admin
/// endpoints expect: ISO-8859-1 bytes, `+` for space, and `?` for anything
/// outside Latin-1.
pub fn encode_component(value: &str) -> String {
    let latin1: Vec<u8> = value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    form_urlencoded::byte_serialize(&latin1).collect()
}

/// An out-of-band metadata update, built but not yet sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    base: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

impl MetadataRequest {
    /// A GET to `http://{host}:{port}{path}`.
    pub fn new(host: &str, port: u16, path: &str) -> Self {
        Self {
            base: format!("http://{host}:{port}{path}"),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Full URL with the encoded query string.
    pub fn url(&self) -> String {
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");

        if query.is_empty() {
            self.base.clone()
        } else {
            let sep = if self.base.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.base, sep, query)
        }
    }

    /// Perform the request. Any non-success status is an error.
    pub async fn send(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        let mut request = client.get(self.url());
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?.error_for_status()?;
        debug!("Metadata update accepted with status {}", response.status());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_song_template() {
        assert_eq!(render_song("song", "artist", "album"), "album song artist");
    }

    #[test]
    fn test_render_song_substitution_order() {
        // The song is substituted first, so a placeholder inside it is expanded later.
        assert_eq!(render_song("_artist_", "Band", "LP"), "LP Band Band");
        // Nothing substitutes into a placeholder introduced by the album.
        assert_eq!(render_song("s", "a", "_song_"), "_song_ s a");
    }

    #[test]
    fn test_encode_component_legacy_rules() {
        assert_eq!(encode_component("Abc.-*_09"), "Abc.-*_09");
        assert_eq!(encode_component("a b"), "a+b");
        assert_eq!(encode_component("/stream1"), "%2Fstream1");
        assert_eq!(encode_component("caf\u{e9}"), "caf%E9");
        assert_eq!(encode_component("\u{263a}"), "%3F");
        assert_eq!(encode_component("a&b=c"), "a%26b%3Dc");
        assert_eq!(encode_component("~x!"), "%7Ex%21");
    }

    #[test]
    fn test_url_keeps_param_order() {
        let request = MetadataRequest::new("localhost", 8000, "/admin/metadata")
            .param("mode", "updinfo")
            .param("mount", "/live")
            .param("song", "A B");

        assert_eq!(
            request.url(),
            "http://localhost:8000/admin/metadata?mode=updinfo&mount=%2Flive&song=A+B"
        );
        assert_eq!(request.param_value("mount"), Some("/live"));
        assert_eq!(request.param_value("missing"), None);
    }

    #[test]
    fn test_url_without_params() {
        let request = MetadataRequest::new("example.com", 80, "/admin.cgi");
        assert_eq!(request.url(), "http://example.com:80/admin.cgi");
    }
}
