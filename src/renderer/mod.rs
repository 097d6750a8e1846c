// ABOUTME: Renderer lifecycle state machine and public facade
// ABOUTME: Ties scheduler, sync clock, device and stretch stage together

/// Renderer implementation
pub mod audio_renderer;

pub use audio_renderer::{AudioRenderer, ReceiveStatus, RenderState, RendererConfig};
