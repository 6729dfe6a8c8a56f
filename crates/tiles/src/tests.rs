use super::*;
use stroke_geom::Rect;
use stroke_protocol::LayerId;

fn create_device_queue() -> (wgpu::Device, wgpu::Queue) {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .expect("request wgpu adapter");
        let limits = adapter.limits();
        adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("tiles tests"),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .expect("request wgpu device")
    })
}

fn solid_raster(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let mut out = vec![0u8; width as usize * height as usize * 4];
    for px in out.chunks_exact_mut(4) {
        px.copy_from_slice(&rgba);
    }
    out
}

#[test]
fn upload_then_readback_round_trips_a_solid_rect() {
    let (device, queue) = create_device_queue();
    let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
    let layer = LayerId::default();
    let rect = Rect::new(10, 10, 42, 42);
    let raster = solid_raster(rect.width(), rect.height(), [200, 40, 40, 255]);

    store
        .upload_rect(layer, rect, &raster, rect.width() * 4)
        .expect("upload_rect");
    let back = store.readback_rect(layer, rect);

    assert_eq!(back, raster);
}

#[test]
fn upload_spanning_tile_boundary_creates_multiple_tiles() {
    let (device, queue) = create_device_queue();
    let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
    let layer = LayerId::default();
    // straddles the boundary between tile (0,0) and tile (1,0).
    let rect = Rect::new(
        TILE_SIZE as i32 - 8,
        0,
        TILE_SIZE as i32 + 8,
        16,
    );
    let raster = solid_raster(rect.width(), rect.height(), [0, 255, 0, 255]);

    store
        .upload_rect(layer, rect, &raster, rect.width() * 4)
        .expect("upload_rect");

    assert_eq!(store.tile_count(layer), 2);
    let back = store.readback_rect(layer, rect);
    assert_eq!(back, raster);
}

#[test]
fn readback_of_absent_tile_is_transparent_black() {
    let (device, queue) = create_device_queue();
    let store = TileStore::new(device, queue, 64 * 1024 * 1024);
    let layer = LayerId::default();
    let back = store.readback_rect(layer, Rect::new(0, 0, 8, 8));
    assert!(back.iter().all(|&b| b == 0));
}

#[test]
fn eviction_respects_budget_and_drops_lru_tile() {
    let (device, queue) = create_device_queue();
    let tile_bytes = TILE_SIZE as u64 * TILE_SIZE as u64 * 4;
    let mut store = TileStore::new(device, queue, tile_bytes);
    let layer = LayerId::default();

    store.get_or_create(layer, stroke_geom::TileCoord::new(0, 0));
    assert_eq!(store.tile_count(layer), 1);

    store.get_or_create(layer, stroke_geom::TileCoord::new(1, 0));
    // only one tile's worth of budget; the first tile must have been evicted.
    assert_eq!(store.tile_count(layer), 1);
    assert!(store.get(layer, stroke_geom::TileCoord::new(1, 0)).is_some());
    assert!(store.get(layer, stroke_geom::TileCoord::new(0, 0)).is_none());
    assert!(store.resident_bytes() <= store.budget_bytes());
}

#[test]
fn remove_layer_drops_all_its_tiles_and_residency() {
    let (device, queue) = create_device_queue();
    let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
    let layer = LayerId::default();
    store.get_or_create(layer, stroke_geom::TileCoord::new(0, 0));
    store.get_or_create(layer, stroke_geom::TileCoord::new(1, 1));

    store.remove_layer(layer);

    assert_eq!(store.tile_count(layer), 0);
    assert_eq!(store.resident_bytes(), 0);
}

#[test]
fn selection_mask_gpu_round_trips_a_rect() {
    let (device, queue) = create_device_queue();
    let mut mask = SelectionMaskGpu::new(&device, 16, 16);
    let rect = Rect::new(2, 2, 6, 6);
    let data = vec![128u8; rect.width() as usize * rect.height() as usize];

    mask.upload(&queue, rect, &data);

    assert_eq!(mask.sample(3, 3), 128);
    assert_eq!(mask.sample(0, 0), 255);
}

#[test]
fn selection_mask_clear_resets_to_fully_selected() {
    let (device, queue) = create_device_queue();
    let mut mask = SelectionMaskGpu::new(&device, 8, 8);
    let rect = Rect::new(0, 0, 8, 8);
    let data = vec![0u8; 64];
    mask.upload(&queue, rect, &data);
    assert_eq!(mask.sample(0, 0), 0);

    mask.clear(&queue);

    assert_eq!(mask.sample(0, 0), 255);
    assert_eq!(mask.sample(7, 7), 255);
}
