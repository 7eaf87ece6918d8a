use render_protocol::Size;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ImageCopyError {
    #[error("image data holds {actual} bytes, {expected} expected")]
    DataSize { expected: usize, actual: usize },
    #[error("copy of {size} from ({src_x}, {src_y}) exceeds source {src_size}")]
    SourceOutOfBounds {
        src_x: u32,
        src_y: u32,
        size: Size,
        src_size: Size,
    },
    #[error("copy of {size} to ({dst_x}, {dst_y}) exceeds destination {dst_size}")]
    DestinationOutOfBounds {
        dst_x: u32,
        dst_y: u32,
        size: Size,
        dst_size: Size,
    },
}

/// Tightly packed 8-bit image with `CHANNELS` bytes per pixel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image<const CHANNELS: usize> {
    size: Size,
    data: Vec<u8>,
}

pub type AlphaImage = Image<1>;
/// RGBA with color channels premultiplied by alpha.
pub type PremultipliedImage = Image<4>;

fn within(origin: u32, extent: u32, limit: u32) -> bool {
    u64::from(origin) + u64::from(extent) <= u64::from(limit)
}

impl<const CHANNELS: usize> Image<CHANNELS> {
    /// Zero-filled image.
    pub fn new(size: Size) -> Self {
        Self {
            size,
            data: vec![0; Self::byte_len(size)],
        }
    }

    pub fn from_data(size: Size, data: Vec<u8>) -> Result<Self, ImageCopyError> {
        let expected = Self::byte_len(size);
        if data.len() != expected {
            return Err(ImageCopyError::DataSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    fn byte_len(size: Size) -> usize {
        size.width as usize * size.height as usize * CHANNELS
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Non-empty with data for every pixel.
    pub fn is_valid(&self) -> bool {
        !self.size.is_empty() && self.data.len() == Self::byte_len(self.size)
    }

    pub fn stride(&self) -> usize {
        self.size.width as usize * CHANNELS
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let start = y as usize * self.stride() + x as usize * CHANNELS;
        Some(&self.data[start..start + CHANNELS])
    }

    /// Copies a `size` block from `src` at `src_pt` into `dst` at `dst_pt`.
    pub fn copy(
        src: &Self,
        dst: &mut Self,
        src_pt: (u32, u32),
        dst_pt: (u32, u32),
        size: Size,
    ) -> Result<(), ImageCopyError> {
        let (src_x, src_y) = src_pt;
        let (dst_x, dst_y) = dst_pt;
        if !within(src_x, size.width, src.size.width) || !within(src_y, size.height, src.size.height)
        {
            return Err(ImageCopyError::SourceOutOfBounds {
                src_x,
                src_y,
                size,
                src_size: src.size,
            });
        }
        if !within(dst_x, size.width, dst.size.width) || !within(dst_y, size.height, dst.size.height)
        {
            return Err(ImageCopyError::DestinationOutOfBounds {
                dst_x,
                dst_y,
                size,
                dst_size: dst.size,
            });
        }

        let row_bytes = size.width as usize * CHANNELS;
        let src_stride = src.stride();
        let dst_stride = dst.stride();
        for row in 0..size.height as usize {
            let src_start = (src_y as usize + row) * src_stride + src_x as usize * CHANNELS;
            let dst_start = (dst_y as usize + row) * dst_stride + dst_x as usize * CHANNELS;
            dst.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src.data[src_start..src_start + row_bytes]);
        }
        Ok(())
    }
}
