// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use lantern_core::RenderConfig;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod mesh;
pub mod scheduler;
pub mod texture;

pub use mesh::{MeshData, Vertex};
pub use scheduler::{Acquired, FrameBackend, FrameOutcome, FrameScheduler, Presented};
pub use texture::TextureData;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to open {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load model {path}")]
    Obj {
        path: String,
        #[source]
        source: tobj::LoadError,
    },
    #[error("failed to load texture {path}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("index {index} out of range for {len} vertices")]
    IndexOutOfRange { index: u32, len: usize },
    #[error("model has no triangles")]
    EmptyMesh,
    #[error("texture is {width}x{height} but carries {actual} bytes (expected {expected})")]
    PixelCount {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records a new framebuffer size. Recreation happens at the next present boundary.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self) -> Result<FrameOutcome>;
}
