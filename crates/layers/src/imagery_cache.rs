use std::collections::BTreeMap;
use std::rc::Rc;

use scene::{ImageryLayer, ImageryProvider, provider_key};
use tracing::debug;

use crate::map_item::ImageryParts;

/// Memo key: provider identity plus clipping rectangle bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageryLayerKey {
    provider: usize,
    rectangle: Option<[u64; 4]>,
}

impl ImageryLayerKey {
    pub fn for_parts(parts: &ImageryParts) -> Self {
        Self {
            provider: provider_key(&parts.imagery_provider),
            rectangle: parts.clipping_rectangle.map(|r| r.key()),
        }
    }
}

struct Entry {
    layer: Rc<ImageryLayer>,
    // Keeps the provider allocation alive so its address stays a unique key.
    _provider: Rc<dyn ImageryProvider>,
    last_used_pass: u64,
}

/// Imagery layers memoized by (provider, rectangle).
///
/// The same pair always yields the same layer handle. Entries not touched
/// since the last [`ImageryLayerCache::begin_pass`] are evicted by
/// [`ImageryLayerCache::end_pass`].
#[derive(Default)]
pub struct ImageryLayerCache {
    entries: BTreeMap<ImageryLayerKey, Entry>,
    pass: u64,
}

impl ImageryLayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_pass(&mut self) {
        self.pass = self.pass.wrapping_add(1);
    }

    pub fn layer_for(&mut self, parts: &ImageryParts) -> Rc<ImageryLayer> {
        let pass = self.pass;
        let entry = self
            .entries
            .entry(ImageryLayerKey::for_parts(parts))
            .or_insert_with(|| Entry {
                layer: Rc::new(ImageryLayer::new(
                    Rc::clone(&parts.imagery_provider),
                    parts.clipping_rectangle,
                )),
                _provider: Rc::clone(&parts.imagery_provider),
                last_used_pass: pass,
            });
        entry.last_used_pass = pass;
        Rc::clone(&entry.layer)
    }

    /// Drops entries unused during the current pass. Returns how many.
    pub fn end_pass(&mut self) -> usize {
        let pass = self.pass;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.last_used_pass == pass);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted imagery layers");
        }
        evicted
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
    use super::ImageryLayerCache;
    use crate::map_item::ImageryParts;
    use foundation::Rectangle;
    use scene::ImageryProvider;
    use scene::headless::StaticImageryProvider;
    use std::rc::Rc;

    fn provider(url: &str) -> Rc<dyn ImageryProvider> {
        Rc::new(StaticImageryProvider::new(Some(url)))
    }

    #[test]
    fn same_provider_and_rectangle_share_a_layer() {
        let mut cache = ImageryLayerCache::new();
        let p = provider("a");
        cache.begin_pass();
        let first = cache.layer_for(&ImageryParts::new(p.clone()).with_alpha(0.3));
        let second = cache.layer_for(&ImageryParts::new(p.clone()).with_alpha(0.8));
        assert!(Rc::ptr_eq(&first, &second));

        let clipped = cache.layer_for(
            &ImageryParts::new(p).with_clipping_rectangle(Rectangle::from_degrees(0.0, 0.0, 1.0, 1.0)),
        );
        assert!(!Rc::ptr_eq(&first, &clipped));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unused_entries_are_evicted_at_end_of_pass() {
        let mut cache = ImageryLayerCache::new();
        let (a, b) = (provider("a"), provider("b"));
        cache.begin_pass();
        let la = cache.layer_for(&ImageryParts::new(a.clone()));
        cache.layer_for(&ImageryParts::new(b));
        assert_eq!(cache.end_pass(), 0);

        cache.begin_pass();
        let again = cache.layer_for(&ImageryParts::new(a));
        assert_eq!(cache.end_pass(), 1);
        assert!(Rc::ptr_eq(&la, &again));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn apply_to_reports_changes() {
        let parts = ImageryParts::new(provider("a")).with_alpha(0.5);
        let mut cache = ImageryLayerCache::new();
        let layer = cache.layer_for(&parts);
        assert!(parts.apply_to(&layer));
        assert!(!parts.apply_to(&layer));
        assert_eq!(layer.alpha(), 0.5);
    }
}
