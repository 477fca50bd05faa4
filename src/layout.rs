//! Vertical frame split into header, image, caption and margin bands.

/// Horizontal strip of the frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub top: u32,
    pub height: u32,
}

impl Band {
    pub fn center(&self) -> u32 {
        self.top + self.height / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub header: Band,
    pub image: Band,
    pub caption: Band,
}

/// Relative band sizes, top to bottom; the last one is empty margin.
const WEIGHTS: [u32; 4] = [25, 55, 20, 10];

impl Layout {
    pub fn shorts() -> Self {
        Self::new(1080, 1920)
    }

    /// Bands are scaled down together when the weights overflow the frame.
    pub fn new(width: u32, height: u32) -> Self {
        let total: u32 = WEIGHTS.iter().sum();
        let mut edges = [0_u32; 5];
        let mut acc = 0;
        for (i, weight) in WEIGHTS.iter().enumerate() {
            acc += weight;
            edges[i + 1] = ((acc as f64) * height as f64 / total as f64).round() as u32;
        }
        let band = |i: usize| Band {
            top: edges[i],
            height: edges[i + 1] - edges[i],
        };
        let mut image = band(1);
        // Encoders want even dimensions for 4:2:0 chroma.
        image.height -= image.height % 2;
        Self {
            width: width - width % 2,
            height: height - height % 2,
            header: band(0),
            image,
            caption: band(2),
        }
    }
}
