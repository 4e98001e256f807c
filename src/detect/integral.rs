/// Summed-area tables over a luminance plane.
///
/// Both tables are `(width + 1) x (height + 1)` with a zero first row and
/// column, so any rectangle sum is four lookups.
pub(crate) struct IntegralImage {
    stride: usize,
    width: u32,
    height: u32,
    sum: Vec<u32>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(luma: &[u8], width: u32, height: u32) -> Self {
        let w = width as usize;
        let h = height as usize;
        let stride = w + 1;
        let mut sum = vec![0u32; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0u32;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = luma[y * w + x] as u32;
                row_sum += v;
                row_sq += (v * v) as u64;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self {
            stride,
            width,
            height,
            sum,
            sq_sum,
        }
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    /// Sum of pixels in `[x, x + w) x [y, y + h)`. Caller keeps it in bounds.
    pub(crate) fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u32 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let s = &self.sum;
        // Wrapping keeps the result exact even if the corner sum overflows.
        s[y1 * self.stride + x1]
            .wrapping_add(s[y0 * self.stride + x0])
            .wrapping_sub(s[y0 * self.stride + x1])
            .wrapping_sub(s[y1 * self.stride + x0])
    }

    pub(crate) fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let s = &self.sq_sum;
        s[y1 * self.stride + x1] + s[y0 * self.stride + x0]
            - s[y0 * self.stride + x1]
            - s[y1 * self.stride + x0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_sums_match_brute_force() {
        let (w, h) = (7u32, 5u32);
        let luma: Vec<u8> = (0..w * h).map(|i| (i * 13 % 256) as u8).collect();
        let ii = IntegralImage::new(&luma, w, h);

        let brute = |x: u32, y: u32, rw: u32, rh: u32| -> (u32, u64) {
            let mut s = 0u32;
            let mut sq = 0u64;
            for yy in y..y + rh {
                for xx in x..x + rw {
                    let v = luma[(yy * w + xx) as usize] as u32;
                    s += v;
                    sq += (v * v) as u64;
                }
            }
            (s, sq)
        };

        for (x, y, rw, rh) in [(0, 0, 7, 5), (2, 1, 3, 3), (6, 4, 1, 1), (1, 0, 0, 2)] {
            let (s, sq) = brute(x, y, rw, rh);
            assert_eq!(ii.rect_sum(x, y, rw, rh), s);
            assert_eq!(ii.rect_sq_sum(x, y, rw, rh), sq);
        }
    }
}
