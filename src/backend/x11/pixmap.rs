//! Textures mirroring the contents of an X pixmap.
//!
//! The texture is brought up to date lazily from [`TexturePixmapX11::update`]. When the window
//! system offers a zero-copy path (binding the pixmap directly as a texture image) it is used,
//! otherwise the damaged part of the pixmap is downloaded and uploaded into a texture owned by
//! the [`TextureStorage`].

use std::{fmt, io, ptr, ptr::NonNull, rc::Rc, slice};

use drm_fourcc::DrmFourcc;
use tracing::{debug, trace, warn};

use crate::utils::{NativeHandle, Rectangle, Size};

use super::{ImageFormat, PixmapGeometry, PixmapSource, VisualMasks, X11Error, XEvent};

/// Name of a GPU texture
pub type TextureId = u32;

/// Pixel data to upload
#[derive(Debug)]
pub struct ImageData<'a> {
    /// Rows of pixel data, starting at the first pixel to upload
    pub data: &'a [u8],
    /// Bytes between the start of two rows
    pub stride: usize,
    /// Layout of a pixel
    pub format: DrmFourcc,
}

/// The render pipeline side of a pixmap texture
pub trait TextureStorage {
    /// Allocate a texture covering the whole pixmap
    fn create_texture(&mut self, size: Size, format: DrmFourcc) -> Option<TextureId>;
    /// Upload `image` into `area` of `texture`
    fn upload(&mut self, texture: TextureId, area: Rectangle, image: ImageData<'_>);
    /// Free a texture created with [`TextureStorage::create_texture`]
    fn destroy_texture(&mut self, texture: TextureId);
    /// The texture backing a pixmap texture changed, cached bindings are stale
    fn storage_changed(&mut self);
}

/// Zero-copy binding of a pixmap provided by a window system backend
pub trait PixmapBinding: fmt::Debug {
    /// Bring the bound texture up to date.
    ///
    /// Returns `false` if the contents have to be copied instead, either for this update only
    /// or permanently.
    fn update(&mut self, needs_mipmap: bool) -> bool;
    /// The pixmap changed and has to be rebound before its next use
    fn damage_notify(&mut self);
    /// The bound texture, if any
    fn texture(&self) -> Option<TextureId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct DamageRect {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl DamageRect {
    fn full(size: Size) -> Self {
        DamageRect {
            x1: 0,
            y1: 0,
            x2: size.w,
            y2: size.h,
        }
    }

    fn is_empty(&self) -> bool {
        self.x1 == self.x2 || self.y1 == self.y2
    }

    fn is_whole(&self, size: Size) -> bool {
        *self == DamageRect::full(size)
    }

    fn union(&mut self, area: Rectangle) {
        if area.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = DamageRect {
                x1: area.x,
                y1: area.y,
                x2: area.x + area.width,
                y2: area.y + area.height,
            };
        } else {
            self.x1 = self.x1.min(area.x);
            self.y1 = self.y1.min(area.y);
            self.x2 = self.x2.max(area.x + area.width);
            self.y2 = self.y2.max(area.y + area.height);
        }
    }

    fn area(&self) -> Rectangle {
        Rectangle::new(self.x1, self.y1, self.x2 - self.x1, self.y2 - self.y1)
    }

    /// The part of the damage inside a pixmap of `size`
    fn clip(&self, size: Size) -> DamageRect {
        let x1 = self.x1.clamp(0, size.w);
        let y1 = self.y1.clamp(0, size.h);
        DamageRect {
            x1,
            y1,
            x2: self.x2.clamp(x1, size.w),
            y2: self.y2.clamp(y1, size.h),
        }
    }
}

/// A SysV shared memory segment
#[derive(Debug)]
pub struct ShmSegment {
    shmid: i32,
    addr: NonNull<u8>,
    size: usize,
}

impl ShmSegment {
    /// Allocate and map a private segment of `size` bytes
    pub fn new(size: usize) -> io::Result<ShmSegment> {
        let shmid = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o777) };
        if shmid == -1 {
            return Err(io::Error::last_os_error());
        }

        let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };
        if addr as isize == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) };
            return Err(err);
        }

        match NonNull::new(addr as *mut u8) {
            Some(addr) => Ok(ShmSegment { shmid, addr, size }),
            None => {
                unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) };
                Err(io::Error::new(io::ErrorKind::Other, "shmat returned a null mapping"))
            }
        }
    }

    /// The segment id
    pub fn id(&self) -> i32 {
        self.shmid
    }

    /// Contents of the segment
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is `size` bytes long and lives as long as `self`
        unsafe { slice::from_raw_parts(self.addr.as_ptr(), self.size) }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.addr.as_ptr() as *const libc::c_void);
            libc::shmctl(self.shmid, libc::IPC_RMID, ptr::null_mut());
        }
    }
}

#[derive(Debug)]
enum ShmState {
    Untried,
    Unavailable,
    Attached { segment: ShmSegment, xid: u32 },
}

fn pixel_format(masks: VisualMasks, depth: u8, bits_per_pixel: u8) -> Option<DrmFourcc> {
    let alpha = depth >= 32;
    match (bits_per_pixel, masks.red, alpha) {
        (32, 0x00ff_0000, true) => Some(DrmFourcc::Argb8888),
        (32, 0x00ff_0000, false) => Some(DrmFourcc::Xrgb8888),
        (32, 0x0000_00ff, true) => Some(DrmFourcc::Abgr8888),
        (32, 0x0000_00ff, false) => Some(DrmFourcc::Xbgr8888),
        (16, 0xf800, _) => Some(DrmFourcc::Rgb565),
        _ => None,
    }
}

/// A texture tracking the contents of an X pixmap
pub struct TexturePixmapX11<S: PixmapSource, T: TextureStorage> {
    server: Rc<S>,
    storage: T,
    pixmap: u32,
    size: Size,
    depth: u8,
    masks: VisualMasks,
    damage: Option<NativeHandle<u32>>,
    damage_rect: DamageRect,
    texture: Option<TextureId>,
    image: Option<Vec<u8>>,
    shm: ShmState,
    binding: Option<Box<dyn PixmapBinding>>,
    zero_copy: bool,
}

impl<S: PixmapSource, T: TextureStorage> fmt::Debug for TexturePixmapX11<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TexturePixmapX11")
            .field("pixmap", &self.pixmap)
            .field("size", &self.size)
            .field("depth", &self.depth)
            .field("damage", &self.damage)
            .field("damage_rect", &self.damage_rect)
            .field("texture", &self.texture)
            .field("shm", &self.shm)
            .field("binding", &self.binding)
            .field("zero_copy", &self.zero_copy)
            .finish_non_exhaustive()
    }
}

impl<S: PixmapSource, T: TextureStorage> TexturePixmapX11<S, T> {
    /// Track `pixmap`.
    ///
    /// With `automatic_updates` a damage object is created (if the server supports Damage) and
    /// its events, passed to [`TexturePixmapX11::handle_event`], keep the texture up to date.
    /// Otherwise changes have to be reported with [`TexturePixmapX11::update_area`].
    pub fn new(server: Rc<S>, pixmap: u32, automatic_updates: bool, storage: T) -> Result<Self, X11Error> {
        let PixmapGeometry { size, depth } = server.pixmap_geometry(pixmap)?;
        let masks = server.visual_masks();

        let damage = if automatic_updates {
            let damage = server.create_damage(pixmap);
            if damage.is_none() {
                debug!(pixmap, "No Damage extension, the pixmap texture will not update automatically");
            }
            damage.map(NativeHandle::Owned)
        } else {
            None
        };

        debug!(pixmap, ?size, depth, "Created pixmap texture");
        Ok(TexturePixmapX11 {
            server,
            storage,
            pixmap,
            size,
            depth,
            masks,
            damage,
            // the texture starts uninitialized, so everything needs to be fetched once
            damage_rect: DamageRect::full(size),
            texture: None,
            image: None,
            shm: ShmState::Untried,
            binding: None,
            zero_copy: false,
        })
    }

    /// The tracked pixmap
    pub fn pixmap(&self) -> u32 {
        self.pixmap
    }

    /// Size of the pixmap
    pub fn size(&self) -> Size {
        self.size
    }

    /// Depth of the pixmap
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Install the zero-copy path of a window system backend
    pub fn set_binding(&mut self, binding: Box<dyn PixmapBinding>) {
        self.binding = Some(binding);
    }

    /// Track changes through a damage object owned by the application.
    ///
    /// Replaces (and destroys) a damage object created for automatic updates.
    pub fn set_damage_object(&mut self, damage: u32) {
        if let Some(NativeHandle::Owned(owned)) = self.damage.take() {
            self.server.destroy_damage(owned);
        }
        self.damage = Some(NativeHandle::Foreign(damage));
    }

    /// Whether the last update used the zero-copy path
    pub fn is_using_tfp_extension(&self) -> bool {
        self.zero_copy
    }

    /// Feed an X event. Returns `true` if the event belonged to this texture.
    pub fn handle_event(&mut self, event: &XEvent) -> bool {
        match (*event, self.damage) {
            (XEvent::DamageNotify { damage, area }, Some(ours)) if damage == ours.get() => {
                self.server.subtract_damage(damage);
                self.update_area(area);
                true
            }
            _ => false,
        }
    }

    /// Mark an area of the pixmap as changed
    pub fn update_area(&mut self, area: Rectangle) {
        self.damage_rect.union(area);
        trace!(pixmap = self.pixmap, ?area, damage = ?self.damage_rect.area(), "Pixmap damaged");
        if let Some(binding) = self.binding.as_mut() {
            binding.damage_notify();
        }
    }

    /// Bring the texture up to date
    #[profiling::function]
    pub fn update(&mut self, needs_mipmap: bool) {
        if let Some(binding) = self.binding.as_mut() {
            if binding.update(needs_mipmap) {
                self.set_zero_copy(true);
                return;
            }
        }

        // may be temporary, the next update tries the zero-copy path again
        self.set_zero_copy(false);
        if let Err(err) = self.update_image() {
            warn!(pixmap = self.pixmap, ?err, "Failed to update the pixmap texture");
        }
    }

    /// The texture currently holding the pixmap contents.
    ///
    /// Updates the texture first if nothing has been uploaded yet.
    pub fn texture(&mut self) -> Option<TextureId> {
        for _ in 0..2 {
            let texture = if self.zero_copy {
                self.binding.as_ref().and_then(|binding| binding.texture())
            } else {
                self.texture
            };
            if texture.is_some() {
                return texture;
            }
            self.update(false);
        }
        None
    }

    fn set_zero_copy(&mut self, zero_copy: bool) {
        if self.zero_copy != zero_copy {
            debug!(pixmap = self.pixmap, zero_copy, "Pixmap texture storage changed");
            self.storage.storage_changed();
            self.zero_copy = zero_copy;
        }
    }

    fn try_alloc_shm(&mut self, format: &ImageFormat) {
        if !self.server.shm_available() {
            debug!(pixmap = self.pixmap, "No MIT-SHM extension, using plain image transfers");
            self.shm = ShmState::Unavailable;
            return;
        }
        let size = format.stride(self.size.w) * self.size.h.max(0) as usize;
        self.shm = match ShmSegment::new(size) {
            Ok(segment) => match self.server.attach_shm(segment.id()) {
                Some(xid) => {
                    debug!(pixmap = self.pixmap, shmid = segment.id(), "Using shared memory for pixmap updates");
                    ShmState::Attached { segment, xid }
                }
                None => {
                    debug!(pixmap = self.pixmap, "Shared memory images unavailable");
                    ShmState::Unavailable
                }
            },
            Err(err) => {
                warn!(?err, "shmget failed");
                ShmState::Unavailable
            }
        };
    }

    fn update_image(&mut self) -> Result<(), X11Error> {
        let damage = self.damage_rect.clip(self.size);
        if damage.is_empty() {
            self.damage_rect = DamageRect::default();
            return Ok(());
        }
        let area = damage.area();
        trace!(
            pixmap = self.pixmap,
            ?area,
            whole = damage.is_whole(self.size),
            "Updating pixmap texture contents"
        );

        let Some(format) = self.server.image_format(self.depth) else {
            warn!(depth = self.depth, "X server has no image format for the pixmap depth");
            return Ok(());
        };
        let Some(fourcc) = pixel_format(self.masks, self.depth, format.bits_per_pixel) else {
            warn!(depth = self.depth, masks = ?self.masks, "Unsupported pixmap pixel format");
            return Ok(());
        };

        let texture = match self.texture {
            Some(texture) => texture,
            None => {
                let Some(texture) = self.storage.create_texture(self.size, fourcc) else {
                    warn!(pixmap = self.pixmap, "Failed to create a texture for the pixmap");
                    return Ok(());
                };
                self.texture = Some(texture);
                texture
            }
        };

        if self.image.is_none() && matches!(self.shm, ShmState::Untried) {
            self.try_alloc_shm(&format);
        }

        let full_stride = format.stride(self.size.w);
        let bpp = format.bytes_per_pixel();
        let fetched = match (&mut self.image, &self.shm) {
            (None, ShmState::Attached { segment, xid }) => {
                trace!(pixmap = self.pixmap, ?area, "Updating using XShmGetImage");
                self.server.shm_get_image(self.pixmap, area, *xid)?;
                let stride = format.stride(area.width);
                let len = (stride * area.height as usize).min(segment.as_slice().len());
                self.storage.upload(
                    texture,
                    area,
                    ImageData {
                        data: &segment.as_slice()[..len],
                        stride,
                        format: fourcc,
                    },
                );
                None
            }
            (None, _) => {
                // The whole pixmap is fetched and kept around. Later updates copy only the
                // damaged part into it.
                trace!(pixmap = self.pixmap, "Updating using XGetImage");
                let image = self
                    .server
                    .get_image(self.pixmap, Rectangle::from_size(self.size))?;
                let offset = full_stride * area.y as usize + bpp * area.x as usize;
                self.storage.upload(
                    texture,
                    area,
                    ImageData {
                        data: image.get(offset..).unwrap_or_default(),
                        stride: full_stride,
                        format: fourcc,
                    },
                );
                Some(image)
            }
            (Some(image), _) => {
                trace!(pixmap = self.pixmap, ?area, "Updating using XGetSubImage");
                let sub_image = self.server.get_image(self.pixmap, area)?;
                let sub_stride = format.stride(area.width);
                let row_len = bpp * area.width as usize;
                for row in 0..area.height as usize {
                    let src = row * sub_stride;
                    let dst = full_stride * (area.y as usize + row) + bpp * area.x as usize;
                    if let (Some(src), Some(dst)) =
                        (sub_image.get(src..src + row_len), image.get_mut(dst..dst + row_len))
                    {
                        dst.copy_from_slice(src);
                    }
                }
                let offset = full_stride * area.y as usize + bpp * area.x as usize;
                self.storage.upload(
                    texture,
                    area,
                    ImageData {
                        data: image.get(offset..).unwrap_or_default(),
                        stride: full_stride,
                        format: fourcc,
                    },
                );
                None
            }
        };
        if fetched.is_some() {
            self.image = fetched;
        }

        self.damage_rect = DamageRect::default();
        Ok(())
    }
}

impl<S: PixmapSource, T: TextureStorage> Drop for TexturePixmapX11<S, T> {
    fn drop(&mut self) {
        self.binding = None;
        if let ShmState::Attached { xid, .. } = std::mem::replace(&mut self.shm, ShmState::Unavailable) {
            // the segment itself is released when it goes out of scope
            self.server.detach_shm(xid);
        }
        if let Some(NativeHandle::Owned(damage)) = self.damage {
            self.server.destroy_damage(damage);
        }
        if let Some(texture) = self.texture.take() {
            self.storage.destroy_texture(texture);
        }
    }
}
