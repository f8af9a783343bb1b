use std::rc::Rc;

use foundation::math::Geodetic;
use futures_util::FutureExt;
use futures_util::future::{self, LocalBoxFuture};

use crate::credit::Credit;
use crate::error::TerrainError;

/// Where a terrain provider streams its height tiles from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TerrainSource {
    Ellipsoid,
    Url(String),
    IonAsset {
        asset_id: u64,
        access_token: Option<String>,
    },
    WorldTerrain,
}

pub trait TerrainProvider {
    /// Resolves when the provider's metadata has loaded.
    fn ready(&self) -> LocalBoxFuture<'static, Result<(), TerrainError>>;

    /// Heights in meters for `positions`, sampled at tile `level`.
    fn sample_heights(
        &self,
        level: u32,
        positions: &[Geodetic],
    ) -> LocalBoxFuture<'static, Result<Vec<f64>, TerrainError>>;

    fn source(&self) -> TerrainSource;

    fn credit(&self) -> Option<Credit> {
        None
    }
}

pub fn terrain_provider_key(provider: &Rc<dyn TerrainProvider>) -> usize {
    Rc::as_ptr(provider) as *const () as usize
}

/// Smooth WGS84 surface with zero height everywhere.
#[derive(Debug, Default, Copy, Clone)]
pub struct EllipsoidTerrainProvider;

impl TerrainProvider for EllipsoidTerrainProvider {
    fn ready(&self) -> LocalBoxFuture<'static, Result<(), TerrainError>> {
        future::ready(Ok(())).boxed_local()
    }

    fn sample_heights(
        &self,
        _level: u32,
        positions: &[Geodetic],
    ) -> LocalBoxFuture<'static, Result<Vec<f64>, TerrainError>> {
        future::ready(Ok(vec![0.0; positions.len()])).boxed_local()
    }

    fn source(&self) -> TerrainSource {
        TerrainSource::Ellipsoid
    }
}
