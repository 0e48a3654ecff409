//! Arena of per-camera prebuffer handles.
//!
//! Continuous captures are owned resources looked up by camera id, never
//! module-level singletons.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::CameraConfig;
use crate::prebuffer::PreBuffer;

#[derive(Default)]
pub struct PreBufferRegistry {
    cameras: DashMap<String, Arc<PreBuffer>>,
}

impl PreBufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the camera's prebuffer, creating it on first use.
    pub fn ensure(&self, camera: &CameraConfig) -> Arc<PreBuffer> {
        self.cameras
            .entry(camera.name.clone())
            .or_insert_with(|| Arc::new(PreBuffer::new(camera.clone())))
            .clone()
    }

    pub fn get(&self, camera_name: &str) -> Option<Arc<PreBuffer>> {
        self.cameras.get(camera_name).map(|entry| entry.clone())
    }

    /// Drop the handle from the arena, releasing its subscribers first.
    pub fn remove(&self, camera_name: &str) -> Option<Arc<PreBuffer>> {
        self.cameras.remove(camera_name).map(|(_, prebuffer)| {
            prebuffer.stop();
            prebuffer
        })
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(name: &str) -> CameraConfig {
        serde_json::from_str(&format!(
            r#"{{"name": "{name}", "source": "rtsp://10.0.0.2/cam1"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_ensure_returns_same_handle() {
        let registry = PreBufferRegistry::new();
        let first = registry.ensure(&camera("porch"));
        let second = registry.ensure(&camera("porch"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_releases_handle() {
        let registry = PreBufferRegistry::new();
        registry.ensure(&camera("porch"));
        assert!(registry.remove("porch").is_some());
        assert!(registry.get("porch").is_none());
        assert!(registry.is_empty());
    }
}
