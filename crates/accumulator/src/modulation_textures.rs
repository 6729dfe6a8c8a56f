//! Static lookup textures consumed by the dab pipelines' pattern/noise/
//! soft-edge modulation (spec §4.4.1, §4.4.2): an erf-based falloff table and
//! a baseline procedural noise texture. Neither is host-supplied the way
//! brush tips and patterns are (spec §4.3), so both are built once and
//! uploaded at accumulator construction, grounded on `texture_cache.rs`'s
//! `write_texture`-then-view upload idiom.

const ERF_LUT_SIZE: u32 = 256;
const NOISE_SIZE: u32 = 64;

/// Abramowitz & Stegun 7.1.26, max error 1.5e-7.
fn erf_approx(x: f32) -> f32 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    const A1: f32 = 0.254829592;
    const A2: f32 = -0.284496736;
    const A3: f32 = 1.421413741;
    const A4: f32 = -1.453152027;
    const A5: f32 = 1.061405429;
    const P: f32 = 0.3275911;
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t) + A3) * t + A2) * t + A1;
    sign * (1.0 - poly * t * (-x * x).exp())
}

/// Grayscale row, `lut[i]` the soft-edge mask at `dist_ratio = i/(n-1)`:
/// ~1 near the dab center, ~0 past the radius, erf-shaped in between.
fn erf_lut_bytes() -> Vec<u8> {
    (0..ERF_LUT_SIZE)
        .flat_map(|i| {
            let ratio = i as f32 / (ERF_LUT_SIZE - 1) as f32;
            let value = 0.5 * (1.0 - erf_approx((ratio - 0.5) * 4.0));
            let byte = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            [byte, byte, byte, 255]
        })
        .collect()
}

fn hash_u32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

fn noise_bytes() -> Vec<u8> {
    (0..NOISE_SIZE * NOISE_SIZE)
        .flat_map(|i| {
            let byte = (hash_u32(i) % 256) as u8;
            [byte, byte, byte, 255]
        })
        .collect()
}

fn upload_lookup_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
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
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

pub fn create_erf_lut_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
    upload_lookup_texture(device, queue, "accumulator.erf_lut", ERF_LUT_SIZE, 1, &erf_lut_bytes())
}

pub fn create_noise_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
    upload_lookup_texture(device, queue, "accumulator.noise", NOISE_SIZE, NOISE_SIZE, &noise_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erf_lut_is_monotonically_decreasing() {
        let bytes = erf_lut_bytes();
        let mut prev = 255u8;
        for chunk in bytes.chunks_exact(4) {
            assert!(chunk[0] <= prev);
            prev = chunk[0];
        }
    }

    #[test]
    fn erf_lut_center_is_roughly_half() {
        let bytes = erf_lut_bytes();
        let mid_index = (bytes.len() / 4 / 2) * 4;
        let value = bytes[mid_index] as f32 / 255.0;
        assert!((value - 0.5).abs() < 0.1, "expected ~0.5 at the center, got {value}");
    }

    #[test]
    fn noise_bytes_are_not_constant() {
        let bytes = noise_bytes();
        let first = bytes[0];
        assert!(bytes.chunks_exact(4).any(|chunk| chunk[0] != first));
    }
}
