//! Face alignment to the canonical 112×112 ArcFace crop.
//!
//! Fits a 4-DOF similarity (scale, rotation, translation) from the five
//! detected landmarks to the InsightFace reference positions, then samples
//! the source frame through the inverse transform.

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform `p' = [[a, -b], [b, a]] * p + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit mapping `src` onto `dst`.
    ///
    /// Falls back to the identity when the source points are degenerate
    /// (all landmarks on one pixel).
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut norm = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-12 {
            return Self {
                a: 1.0,
                b: 0.0,
                tx: 0.0,
                ty: 0.0,
            };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map an output coordinate back into the source frame.
    fn invert_point(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear sample of a grayscale buffer; outside pixels read as black.
fn sample_bilinear(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let at = |xi: f32, yi: f32| -> f32 {
        if xi < 0.0 || yi < 0.0 || xi >= width as f32 || yi >= height as f32 {
            return 0.0;
        }
        frame
            .get(yi as usize * width + xi as usize)
            .copied()
            .unwrap_or(0) as f32
    };

    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1.0, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1.0) * (1.0 - fx) * fy
        + at(x0 + 1.0, y0 + 1.0) * fx * fy
}

/// Align a detected face to a canonical 112×112 grayscale crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let transform = Similarity::fit(landmarks, &REFERENCE_LANDMARKS);
    let (w, h) = (width as usize, height as usize);

    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    for (idx, px) in out.iter_mut().enumerate() {
        let ox = (idx % ALIGNED_SIZE) as f32;
        let oy = (idx / ALIGNED_SIZE) as f32;
        if let Some((sx, sy)) = transform.invert_point((ox, oy)) {
            *px = sample_bilinear(frame, w, h, sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
