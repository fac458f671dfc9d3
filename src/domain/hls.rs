use super::ladder::{Rendition, Resolution};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const MASTER_PLAYLIST: &str = "master.m3u8";
pub const MEDIA_PLAYLIST: &str = "playlist.m3u8";
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

pub struct VariantStream {
    pub bandwidth: u32,
    pub resolution: Resolution,
    pub uri: String,
}

/// Multivariant playlist listing every rung of the ladder.
pub struct MasterPlaylist {
    pub version: u8,
    pub independent_segments: bool,
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self {
            version: 3,
            independent_segments: true,
            variants: Vec::new(),
        }
    }

    /// One entry per rendition, child playlists at `<variant>/playlist.m3u8`.
    pub fn from_renditions(renditions: &[Rendition]) -> Self {
        let mut playlist = Self::new();
        for rendition in renditions {
            playlist.add_variant(
                rendition.bandwidth(),
                rendition.resolution,
                format!("{}/{}", rendition.variant.name, MEDIA_PLAYLIST),
            );
        }
        playlist
    }

    pub fn add_variant(&mut self, bandwidth: u32, resolution: Resolution, uri: String) {
        self.variants.push(VariantStream {
            bandwidth,
            resolution,
            uri,
        });
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }
        for variant in &self.variants {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}\n",
                variant.bandwidth, variant.resolution, variant.uri
            ));
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = File::create(path).await?;
        file.write_all(self.render().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

impl Default for MasterPlaylist {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic on-disk layout of one attempt's package.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    root: PathBuf,
}

impl PackageLayout {
    pub fn new(streams_dir: &Path, identity: Uuid) -> Self {
        Self {
            root: streams_dir.join(identity.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn master_playlist(&self) -> PathBuf {
        self.root.join(MASTER_PLAYLIST)
    }

    pub fn variant_dir(&self, variant: &str) -> PathBuf {
        self.root.join(variant)
    }
}
