/// An axis-aligned rectangle in a frame's pixel coordinates.
///
/// Regions produced by detectors are built through [`Region::clamped`], so
/// `x + width` and `y + height` never exceed the frame they came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clips raw detector output to a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` when nothing of the rectangle remains inside the frame.
    pub fn clamped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let x1 = x.clamp(0, frame_width as i64);
        let y1 = y.clamp(0, frame_height as i64);
        let x2 = (x + width).clamp(0, frame_width as i64);
        let y2 = (y + height).clamp(0, frame_height as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self::new(
            x1 as u32,
            y1 as u32,
            (x2 - x1) as u32,
            (y2 - y1) as u32,
        ))
    }

    /// Saturates at `u32::MAX`.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|r| r <= frame_width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= frame_height)
    }
}
