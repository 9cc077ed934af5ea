//! Rasterization and bitonal compression collaborators.

pub mod compression;
pub mod render;

pub use compression::{BitonalEncoder, EncoderMode, Jbig2Encoder, choose_compression, select_compression};
pub use render::{GhostscriptRasterizer, Rasterizer, RenderRequest, RenderedPage};
