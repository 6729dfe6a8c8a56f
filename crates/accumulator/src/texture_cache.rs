//! `PatternCache` and `TextureAtlas`: keyed upload caches for pattern and
//! brush-tip textures (spec §4.3), generalized from this lineage's PNG
//! decode path (the top-level application crate already depends on `png`
//! directly for asset loading) plus a narrowly added `base64` dependency
//! for the data-URI envelope spec §4.3 requires.

use std::collections::HashMap;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtlasDecodeError {
    InvalidBase64,
    InvalidPng(String),
    UnsupportedColorType,
}

impl std::fmt::Display for AtlasDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtlasDecodeError::InvalidBase64 => write!(f, "pattern/brush-tip payload is not valid base64"),
            AtlasDecodeError::InvalidPng(msg) => write!(f, "pattern/brush-tip PNG failed to decode: {msg}"),
            AtlasDecodeError::UnsupportedColorType => write!(f, "pattern/brush-tip PNG color type is not RGBA8 or grayscale"),
        }
    }
}

impl std::error::Error for AtlasDecodeError {}

#[derive(Debug)]
pub struct DecodedRaster {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8.
    pub rgba: Vec<u8>,
}

/// Decodes a base64-encoded PNG into a tightly packed RGBA8 host raster.
pub fn decode_base64_png(base64_payload: &str) -> Result<DecodedRaster, AtlasDecodeError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_payload.as_bytes())
        .map_err(|_| AtlasDecodeError::InvalidBase64)?;
    decode_png_bytes(&bytes)
}

fn decode_png_bytes(bytes: &[u8]) -> Result<DecodedRaster, AtlasDecodeError> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder
        .read_info()
        .map_err(|err| AtlasDecodeError::InvalidPng(err.to_string()))?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|err| AtlasDecodeError::InvalidPng(err.to_string()))?;
    buf.truncate(info.buffer_size());

    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        png::ColorType::Grayscale => buf
            .iter()
            .flat_map(|&v| [v, v, v, 255])
            .collect(),
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0], px[1]])
            .collect(),
        png::ColorType::Indexed => return Err(AtlasDecodeError::UnsupportedColorType),
    };

    Ok(DecodedRaster {
        width: info.width,
        height: info.height,
        rgba,
    })
}

struct Entry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    identity: u64,
    width: u32,
    height: u32,
}

/// A keyed GPU texture upload cache. `set` is synchronous given an already
/// decoded raster (the "fast path" of spec §4.3); [`decode_base64_png`]
/// above is the separate async-style decode step a host calls before
/// retrying `set`.
pub struct TextureCache {
    entries: HashMap<TextureKey, Entry>,
    current: Option<TextureKey>,
    next_identity: u64,
}

impl TextureCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            current: None,
            next_identity: 0,
        }
    }

    fn next_identity(&mut self) -> u64 {
        self.next_identity += 1;
        self.next_identity
    }

    /// Uploads `raster` under `key`, as the label, and makes it current.
    pub fn set(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, key: TextureKey, raster: &DecodedRaster) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("accumulator.texture_cache.entry"),
            size: wgpu::Extent3d {
                width: raster.width,
                height: raster.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &raster.rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(raster.width * 4),
                rows_per_image: Some(raster.height),
            },
            wgpu::Extent3d {
                width: raster.width,
                height: raster.height,
                depth_or_array_layers: 1,
            },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let identity = self.next_identity();
        self.entries.insert(
            key,
            Entry {
                texture,
                view,
                identity,
                width: raster.width,
                height: raster.height,
            },
        );
        self.current = Some(key);
    }

    /// The fast synchronous path: returns `true` and makes `key` current if
    /// already decoded/uploaded; `false` otherwise (caller must go through
    /// the decode-then-`set` path).
    pub fn try_set_current(&mut self, key: TextureKey) -> bool {
        if self.entries.contains_key(&key) {
            self.current = Some(key);
            true
        } else {
            false
        }
    }

    pub fn get_current(&self) -> Option<(&wgpu::TextureView, u64)> {
        let key = self.current?;
        self.entries.get(&key).map(|entry| (&entry.view, entry.identity))
    }

    /// Pixel dimensions of the currently bound entry, for callers that need
    /// to derive per-texel UV scale (e.g. pattern tiling).
    pub fn get_current_dims(&self) -> Option<(u32, u32)> {
        let key = self.current?;
        self.entries.get(&key).map(|entry| (entry.width, entry.height))
    }

    pub fn clear_entry(&mut self, key: TextureKey) {
        self.entries.remove(&key);
        if self.current == Some(key) {
            self.current = None;
        }
    }

    pub fn contains(&self, key: TextureKey) -> bool {
        self.entries.contains_key(&key)
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_pixel_png_base64() -> String {
        // a 1x1 opaque red RGBA8 PNG, base64-encoded.
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, 1, 1);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().expect("write png header");
            writer.write_image_data(&[255, 0, 0, 255]).expect("write png data");
        }
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn decodes_a_minimal_rgba_png() {
        let raster = decode_base64_png(&one_pixel_png_base64()).expect("decode");
        assert_eq!((raster.width, raster.height), (1, 1));
        assert_eq!(raster.rgba, vec![255, 0, 0, 255]);
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode_base64_png("not base64 !!!").unwrap_err();
        assert_eq!(err, AtlasDecodeError::InvalidBase64);
    }

    #[test]
    fn try_set_current_fails_for_unknown_key() {
        let mut cache = TextureCache::new();
        assert!(!cache.try_set_current(TextureKey(1)));
        assert!(cache.get_current().is_none());
    }
}
