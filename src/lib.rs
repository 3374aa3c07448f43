//! # castsource
//!
//! castsource pushes a continuous audio byte stream to Icecast, SHOUTcast v1
//! and SHOUTcast v2 (Ultravox2) servers, pacing writes to the stream's
//! bitrate.
//!
//! Every protocol implements the [`Source`] trait: configure it, `connect`,
//! feed it bytes with `write`, send `update_metadata` whenever the track
//! changes, and `disconnect` when done. Writes never return errors; a
//! broken connection shows up through [`Source::is_started`] and the
//! [`SourceListener`].
//!
//! ## Example
//! ```rust,no_run
//! use castsource::{IcecastSource, Source, SourceConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SourceConfig::new(128, 5000)
//!         .with_server("localhost", 8000)
//!         .with_mount("/live")
//!         .with_credentials("source", "hackme");
//!
//!     let mut source = IcecastSource::new(config);
//!     source.connect().await?;
//!
//!     let mut file = tokio::fs::File::open("track.mp3").await?;
//!     source.update_metadata("Song", "Artist", "Album").await;
//!     let sent = castsource::feed::pump(&mut file, &mut source).await?;
//!     println!("Sent {sent} bytes");
//!
//!     source.disconnect().await;
//!     Ok(())
//! }
//! ```

mod error;
pub mod feed;
mod icecast;
mod legacy;
pub mod metadata;
mod source;
mod throttle;
pub mod ultravox;

// Re-export public API
pub use error::{Error, Result};
pub use icecast::IcecastSource;
pub use legacy::LegacySource;
pub use metadata::MetadataRequest;
pub use source::{
    Connection, Source, SourceConfig, SourceCore, SourceListener, Transport, CONTENT_TYPE, ICY_BR,
    ICY_GENRE, ICY_NAME, ICY_PUB, ICY_URL, USER_AGENT,
};
pub use throttle::RateThrottle;
pub use ultravox::{UltravoxConfig, UltravoxSource};
