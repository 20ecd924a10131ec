//! In-memory zone index with bounding-box prefilter

use std::collections::BTreeMap;

use crate::{BoundingBox, GeoPoint, GeofenceError, Result, Shape};

#[derive(Debug, Clone)]
struct Entry {
    shape: Shape,
    bbox: BoundingBox,
}

/// Zones keyed by `K`. Results come back in key order unless stated otherwise.
#[derive(Debug, Clone)]
pub struct GeofenceIndex<K: Ord + Clone> {
    entries: BTreeMap<K, Entry>,
}

impl<K: Ord + Clone> GeofenceIndex<K> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or replace the zone stored under `key`
    pub fn insert(&mut self, key: K, shape: Shape) -> Option<Shape> {
        let bbox = shape.bbox();
        self.entries
            .insert(key, Entry { shape, bbox })
            .map(|old| old.shape)
    }

    pub fn remove(&mut self, key: &K) -> Option<Shape> {
        self.entries.remove(key).map(|e| e.shape)
    }

    pub fn get(&self, key: &K) -> Option<&Shape> {
        self.entries.get(key).map(|e| &e.shape)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every zone containing `point`
    pub fn containing(&self, point: &GeoPoint) -> Vec<&K> {
        self.entries
            .iter()
            .filter(|(_, e)| e.bbox.contains(point) && e.shape.contains(point))
            .map(|(k, _)| k)
            .collect()
    }

    /// Every zone within `radius_m` of `point`, nearest first, ties by key
    pub fn within_radius(&self, point: &GeoPoint, radius_m: f64) -> Result<Vec<(&K, f64)>> {
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(GeofenceError::InvalidRadius(radius_m));
        }

        let mut hits: Vec<(&K, f64)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.bbox.expand_m(radius_m).contains(point))
            .filter_map(|(k, e)| {
                let d = e.shape.distance_m(point);
                (d <= radius_m).then_some((k, d))
            })
            .collect();

        // BTreeMap iteration is already key-ordered, so a stable sort keeps ties by key
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(hits)
    }
}

impl<K: Ord + Clone> Default for GeofenceIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}
