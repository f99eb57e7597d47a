use std::{ffi::c_int, fmt, rc::Rc};

use tracing::{debug, trace, warn};

use crate::backend::x11::{ErrorTrap, PixmapBinding, TextureId, XServer};

use super::{
    config::PixmapConfig,
    driver::GlxDriver,
    ffi,
};

/// Zero-copy pixmap texture through `GLX_EXT_texture_from_pixmap`
pub struct GlxPixmapBinding<X: XServer, D: GlxDriver> {
    server: Rc<X>,
    driver: Rc<D>,
    pixmap: u32,
    config: PixmapConfig,
    glx_pixmap: Option<u32>,
    has_mipmap_space: bool,
    texture: Option<u32>,
    bind_queued: bool,
    span: tracing::Span,
}

impl<X: XServer, D: GlxDriver> fmt::Debug for GlxPixmapBinding<X, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlxPixmapBinding")
            .field("pixmap", &self.pixmap)
            .field("config", &self.config)
            .field("glx_pixmap", &self.glx_pixmap)
            .field("has_mipmap_space", &self.has_mipmap_space)
            .field("texture", &self.texture)
            .field("bind_queued", &self.bind_queued)
            .finish()
    }
}

impl<X: XServer, D: GlxDriver> GlxPixmapBinding<X, D> {
    pub(super) fn new(
        server: Rc<X>,
        driver: Rc<D>,
        pixmap: u32,
        config: PixmapConfig,
        span: &tracing::Span,
    ) -> Option<Self> {
        let mut binding = GlxPixmapBinding {
            server,
            driver,
            pixmap,
            config,
            glx_pixmap: None,
            has_mipmap_space: false,
            texture: None,
            bind_queued: true,
            span: tracing::trace_span!(parent: span, "glx_pixmap", pixmap),
        };
        binding.create_glx_pixmap(false);
        binding.glx_pixmap.is_some().then_some(binding)
    }

    fn create_glx_pixmap(&mut self, mipmap: bool) {
        let mipmap = mipmap && self.config.can_mipmap;
        let format = if self.config.rgba {
            ffi::GLX_TEXTURE_FORMAT_RGBA_EXT
        } else {
            ffi::GLX_TEXTURE_FORMAT_RGB_EXT
        };
        let attributes: [c_int; 6] = [
            ffi::GLX_TEXTURE_FORMAT_EXT,
            format,
            ffi::GLX_MIPMAP_TEXTURE_EXT,
            c_int::from(mipmap),
            ffi::GLX_TEXTURE_TARGET_EXT,
            ffi::GLX_TEXTURE_2D_EXT,
        ];

        // the pixmap may have been destroyed or may not match the config
        let trap = ErrorTrap::new(&*self.server);
        let glx_pixmap = self.driver.create_pixmap(self.config.config, self.pixmap, &attributes);
        let code = trap.finish();

        match glx_pixmap {
            Some(glx_pixmap) if code == 0 => {
                debug!(parent: &self.span, glx_pixmap, mipmap, "Created GLX pixmap");
                self.glx_pixmap = Some(glx_pixmap);
                self.has_mipmap_space = mipmap;
            }
            Some(glx_pixmap) => {
                warn!(parent: &self.span, code, "Failed to create GLX pixmap");
                // destroy the half created pixmap under a trap as well
                let trap = ErrorTrap::new(&*self.server);
                self.driver.destroy_pixmap(glx_pixmap);
                let code = trap.finish();
                if code != 0 {
                    debug!(parent: &self.span, code, "X error while destroying the failed GLX pixmap");
                }
            }
            None => warn!(parent: &self.span, code, "Failed to create GLX pixmap"),
        }
    }

    fn free_glx_pixmap(&mut self) {
        let Some(glx_pixmap) = self.glx_pixmap.take() else {
            return;
        };
        // the pixmap may already be gone, which invalidates the GLX pixmap too
        let trap = ErrorTrap::new(&*self.server);
        if self.texture.is_some() {
            self.driver.release_tex_image(glx_pixmap);
        }
        self.driver.destroy_pixmap(glx_pixmap);
        let code = trap.finish();
        if code != 0 {
            debug!(parent: &self.span, code, glx_pixmap, "X error while freeing the GLX pixmap");
        }
        self.bind_queued = true;
    }
}

impl<X: XServer, D: GlxDriver> PixmapBinding for GlxPixmapBinding<X, D> {
    #[profiling::function]
    fn update(&mut self, needs_mipmap: bool) -> bool {
        if self.glx_pixmap.is_none() {
            return false;
        }

        if needs_mipmap {
            // temporarily fall back to uploads
            if !self.config.can_mipmap {
                trace!(parent: &self.span, "Config cannot mipmap");
                return false;
            }
            if !self.has_mipmap_space {
                self.free_glx_pixmap();
                self.create_glx_pixmap(true);
                if self.glx_pixmap.is_none() {
                    return false;
                }
            }
        }

        let texture = match self.texture {
            Some(texture) => texture,
            None => match self.driver.gen_texture() {
                Some(texture) => {
                    self.texture = Some(texture);
                    texture
                }
                None => {
                    warn!(parent: &self.span, "Failed to create a texture for the pixmap");
                    self.free_glx_pixmap();
                    return false;
                }
            },
        };

        if self.bind_queued {
            if let Some(glx_pixmap) = self.glx_pixmap {
                trace!(parent: &self.span, glx_pixmap, "Rebinding pixmap");
                self.driver.bind_texture(texture);
                self.driver.release_tex_image(glx_pixmap);
                self.driver.bind_tex_image(glx_pixmap);
                self.bind_queued = false;
            }
        }
        true
    }

    fn damage_notify(&mut self) {
        self.bind_queued = true;
    }

    fn texture(&self) -> Option<TextureId> {
        self.texture
    }
}

impl<X: XServer, D: GlxDriver> Drop for GlxPixmapBinding<X, D> {
    fn drop(&mut self) {
        self.free_glx_pixmap();
        if let Some(texture) = self.texture.take() {
            self.driver.delete_texture(texture);
        }
    }
}
