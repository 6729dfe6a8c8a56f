//! Bind-group cache keyed by typed integer texture identities, replacing
//! the label-string keying spec §9 flags as a source of accidental
//! collisions. Generalized from this lineage's per-pipeline bind-group
//! construction helpers (`Renderer::create_atlas_bind_group` and friends)
//! into a small reusable cache any pipeline here can own.

use std::collections::HashMap;

/// A cache key built from the identities of every texture participating in
/// a bind group. Order matters -- callers must build keys consistently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindGroupKey(Vec<u64>);

impl BindGroupKey {
    pub fn new(identities: &[u64]) -> Self {
        Self(identities.to_vec())
    }
}

/// Caches `wgpu::BindGroup`s by [`BindGroupKey`]. Call [`Self::clear`]
/// whenever canvas size or render scale changes, since every identity
/// referenced by a cached entry may now point at a recreated texture.
#[derive(Default)]
pub struct BindGroupCache {
    entries: HashMap<BindGroupKey, wgpu::BindGroup>,
}

impl BindGroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(
        &mut self,
        key: BindGroupKey,
        build: impl FnOnce() -> wgpu::BindGroup,
    ) -> &wgpu::BindGroup {
        self.entries.entry(key).or_insert_with(build)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_same_identities_are_equal() {
        assert_eq!(BindGroupKey::new(&[1, 2, 3]), BindGroupKey::new(&[1, 2, 3]));
        assert_ne!(BindGroupKey::new(&[1, 2, 3]), BindGroupKey::new(&[3, 2, 1]));
    }
}
