//! Grid rasterization: tileset resource resolution and the three-pass terrain shader.
//!
//! One concrete product: a 100x100 RGBA [`RgbaImage`] composited from a grid's
//! tileset indices, height map and priority map.

mod image;
mod renderer;
mod resource_service;

pub use crate::image::RgbaImage;
pub use renderer::{render_grid, CLIFF_EPSILON, CLIFF_THRESHOLD, MISSING_COLOR};
pub use resource_service::{FetchError, ResourceFetcher, TileResourceService};
