mod converter;
mod overlay;
mod renderer;
mod surface;
#[cfg(test)]
mod tests;

pub use converter::DisplayConverter;
pub use overlay::{
    category_color, draw_annotations, draw_status, load_font_or_warn, OverlayFont, StatusLine,
    FIRE_COLOR, OTHER_COLOR, SMOKE_COLOR,
};
pub use renderer::{spawn_render_loop, Renderer};
pub use surface::{
    create_surface, DisplaySurface, FramebufferSurface, MemorySurface, MemorySurfaceHandle,
};
