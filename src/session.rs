//! Per-import state.
//!
//! Everything an import collects on the way (the mesh table, warnings, per-joint
//! configuration errors) lives in one [`ImportSession`] owned by that import, so
//! independent imports can run on separate threads.

use std::collections::BTreeMap;

use crate::asset::AssetLocation;
use crate::config::ImportConfig;
use crate::error::ConfigError;
use crate::model::{Geometry, RobotModel};

#[derive(Debug)]
pub struct ImportSession {
    config: ImportConfig,
    /// Resolved mesh location -> links that use it.
    meshes: BTreeMap<String, Vec<String>>,
    warnings: Vec<String>,
    config_errors: Vec<ConfigError>,
}

impl ImportSession {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            meshes: BTreeMap::new(),
            warnings: Vec::new(),
            config_errors: Vec::new(),
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Rebuild the mesh table from the visuals and collisions of `model`.
    pub fn register_meshes(&mut self, model: &RobotModel) {
        self.meshes.clear();
        for link in model.links.values() {
            let geometries = link
                .visuals
                .iter()
                .map(|v| &v.geometry)
                .chain(link.collisions.iter().map(|c| &c.geometry));
            for geometry in geometries {
                let Geometry::Mesh { source, .. } = geometry else {
                    continue;
                };
                let key = match &source.location {
                    AssetLocation::File(p) => p.display().to_string(),
                    AssetLocation::Remote(url) => url.clone(),
                };
                let users = self.meshes.entry(key).or_default();
                if !users.contains(&link.name) {
                    users.push(link.name.clone());
                }
            }
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn record_config_error(&mut self, error: ConfigError) {
        self.config_errors.push(error);
    }

    /// Mesh location -> names of the links using it.
    pub fn meshes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.meshes
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn config_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }
}
