//! Framebuffer config selection

use std::ffi::c_int;

use tracing::{debug, warn};
use x11_dl::glx;

use crate::backend::winsys::{FramebufferConfig, GlDriver, WinsysError};

use super::{
    driver::{FbConfig, GlxContext, GlxDriver, VisualInfo},
    ffi,
};

/// `glXChooseFBConfig` attributes for `config`
pub fn fb_config_attributes(config: &FramebufferConfig, version: (u32, u32)) -> Vec<c_int> {
    let mut attributes = vec![
        glx::GLX_DRAWABLE_TYPE,
        glx::GLX_WINDOW_BIT,
        glx::GLX_RENDER_TYPE,
        glx::GLX_RGBA_BIT,
        glx::GLX_DOUBLEBUFFER,
        1,
        glx::GLX_RED_SIZE,
        1,
        glx::GLX_GREEN_SIZE,
        1,
        glx::GLX_BLUE_SIZE,
        1,
        glx::GLX_ALPHA_SIZE,
        if config.has_alpha { 1 } else { ffi::GLX_DONT_CARE },
        glx::GLX_DEPTH_SIZE,
        1,
        glx::GLX_STENCIL_SIZE,
        if config.need_stencil { 1 } else { ffi::GLX_DONT_CARE },
    ];

    // multisampled configs are only selectable from GLX 1.4 on
    if config.samples_per_pixel > 0 && version >= (1, 4) {
        attributes.extend_from_slice(&[
            ffi::GLX_SAMPLE_BUFFERS,
            1,
            ffi::GLX_SAMPLES,
            config.samples_per_pixel as c_int,
        ]);
    }
    attributes
}

/// A chosen config and its visual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChosenConfig {
    /// The config
    pub config: FbConfig,
    /// Its visual
    pub visual: VisualInfo,
}

/// Pick the config for `config`.
///
/// With alpha, only a config whose visual really carries an alpha channel (depth 32 and color
/// masks not covering every bit) is accepted, so that the window manager composites it.
pub fn find_fb_config<D: GlxDriver + ?Sized>(
    driver: &D,
    config: &FramebufferConfig,
    version: (u32, u32),
) -> Result<ChosenConfig, WinsysError> {
    let configs = driver.choose_fb_configs(&fb_config_attributes(config, version));
    if configs.is_empty() {
        return Err(WinsysError::NoConfig);
    }

    let mut candidates = configs.into_iter().filter_map(|fb_config| {
        driver.visual_info(fb_config).map(|visual| ChosenConfig {
            config: fb_config,
            visual,
        })
    });

    let chosen = if config.has_alpha {
        candidates
            .filter(|chosen| chosen.visual.depth == 32)
            .find(|chosen| {
                let masks = chosen.visual.masks;
                masks.red | masks.green | masks.blue != 0xffff_ffff
            })
            .ok_or(WinsysError::NoRgbaConfig)?
    } else {
        candidates.next().ok_or(WinsysError::NoConfig)?
    };

    debug!(?chosen, "Chose framebuffer config");
    Ok(chosen)
}

/// Create the display's context on `config`
pub fn create_context<D: GlxDriver + ?Sized>(
    driver: &D,
    config: FbConfig,
    flavor: GlDriver,
    can_create_attribs: bool,
) -> Result<GlxContext, WinsysError> {
    match flavor {
        GlDriver::Gl3 => {
            if !can_create_attribs {
                return Err(WinsysError::CreateContext(
                    "The driver cannot create GL 3 core profile contexts".into(),
                ));
            }
            let attributes = [
                ffi::GLX_CONTEXT_MAJOR_VERSION_ARB,
                3,
                ffi::GLX_CONTEXT_MINOR_VERSION_ARB,
                1,
                ffi::GLX_CONTEXT_PROFILE_MASK_ARB,
                ffi::GLX_CONTEXT_CORE_PROFILE_BIT_ARB,
                ffi::GLX_CONTEXT_FLAGS_ARB,
                ffi::GLX_CONTEXT_FORWARD_COMPATIBLE_BIT_ARB,
            ];
            driver
                .create_context_attribs(config, &attributes)
                .ok_or_else(|| WinsysError::CreateContext("glXCreateContextAttribs failed".into()))
        }
        GlDriver::Gl => driver
            .create_new_context(config)
            .ok_or_else(|| WinsysError::CreateContext("glXCreateNewContext failed".into())),
        GlDriver::Gles2 => Err(WinsysError::CreateContext("GLX only provides desktop GL".into())),
    }
}

/// A config usable to bind pixmaps of one depth as textures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixmapConfig {
    /// The config
    pub config: FbConfig,
    /// Bind with an alpha channel
    pub rgba: bool,
    /// Mipmaps can be generated from the bound pixmap
    pub can_mipmap: bool,
}

/// Find the config best suited to bind pixmaps of `depth`.
///
/// Among configs whose visual has `depth` and that can bind as RGB (or RGBA for depth 32),
/// single buffered configs without stencil are preferred, then ones that can mipmap.
pub fn find_pixmap_config<D: GlxDriver + ?Sized>(driver: &D, depth: u8) -> Option<PixmapConfig> {
    let attrib = |config: FbConfig, attribute: c_int| driver.fb_config_attrib(config, attribute).unwrap_or(0);

    let mut best: Option<PixmapConfig> = None;
    let mut best_doublebuffer = c_int::MAX;
    let mut best_stencil = c_int::MAX;
    let mut best_mipmap = 0;

    for config in driver.fb_configs() {
        match driver.visual_info(config) {
            Some(visual) if visual.depth == depth => {}
            _ => continue,
        }

        let alpha = attrib(config, glx::GLX_ALPHA_SIZE);
        let buffer_size = attrib(config, glx::GLX_BUFFER_SIZE);
        if buffer_size != c_int::from(depth) && buffer_size - alpha != c_int::from(depth) {
            continue;
        }
        if attrib(config, glx::GLX_STEREO) != 0 || attrib(config, ffi::GLX_SAMPLES) > 1 {
            continue;
        }

        let rgba = if depth == 32 && attrib(config, ffi::GLX_BIND_TO_TEXTURE_RGBA_EXT) != 0 {
            true
        } else if attrib(config, ffi::GLX_BIND_TO_TEXTURE_RGB_EXT) != 0 {
            false
        } else {
            continue;
        };

        let doublebuffer = attrib(config, glx::GLX_DOUBLEBUFFER);
        if doublebuffer > best_doublebuffer {
            continue;
        }
        let stencil = attrib(config, glx::GLX_STENCIL_SIZE);
        if stencil > best_stencil {
            continue;
        }
        let mipmap = attrib(config, ffi::GLX_BIND_TO_MIPMAP_TEXTURE_EXT);
        if mipmap < best_mipmap {
            continue;
        }

        best_doublebuffer = doublebuffer;
        best_stencil = stencil;
        best_mipmap = mipmap;
        best = Some(PixmapConfig {
            config,
            rgba,
            can_mipmap: mipmap != 0,
        });
    }

    if best.is_none() {
        warn!(depth, "No config can bind pixmaps of this depth");
    }
    best
}
