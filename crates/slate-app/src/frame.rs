//! Per-frame context for rendering.

/// State of the frame currently being recorded.
///
/// The frame index is explicit here rather than global engine state, so
/// everything touching per-frame resources receives it as a parameter.
pub struct FrameContext {
    /// Index into per-frame resources (0..frames in flight).
    pub frame_index: usize,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Seconds since application start.
    pub elapsed: f32,
    /// Total frames rendered.
    pub frame_number: u64,
}
