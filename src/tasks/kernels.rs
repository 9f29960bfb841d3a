//! Per-plane image kernels. Planes are row-major `h * w` slices; borders
//! use nearest-pixel extension.

/// Percentile with linear interpolation between closest ranks. NaNs are
/// ignored; an all-NaN plane yields NaN.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Linear stretch of the `[low, high]` percentile range onto `[0, 1]`.
pub fn stretch(plane: &[f64], low: f64, high: f64) -> Vec<f64> {
    let lo = percentile(plane, low);
    let hi = percentile(plane, high);
    if lo.is_nan() || hi.is_nan() || hi <= lo {
        return vec![0.0; plane.len()];
    }
    plane
        .iter()
        .map(|v| ((v - lo) / (hi - lo)).clamp(0.0, 1.0))
        .collect()
}

fn at(plane: &[f64], h: usize, w: usize, y: isize, x: isize) -> f64 {
    let y = y.clamp(0, h as isize - 1) as usize;
    let x = x.clamp(0, w as isize - 1) as usize;
    plane[y * w + x]
}

/// Mean filter with a square `size` window.
pub fn smooth(plane: &[f64], h: usize, w: usize, size: usize) -> Vec<f64> {
    if h == 0 || w == 0 {
        return Vec::new();
    }
    let r = (size / 2) as isize;
    let n = (size * size) as f64;
    let mut out = Vec::with_capacity(plane.len());
    for y in 0..h as isize {
        for x in 0..w as isize {
            let mut sum = 0.0;
            for dy in -r..=r {
                for dx in -r..=r {
                    sum += at(plane, h, w, y + dy, x + dx);
                }
            }
            out.push(sum / n);
        }
    }
    out
}

/// Unsharp mask: `x + amount * (x - mean3(x))`.
pub fn sharpen(plane: &[f64], h: usize, w: usize, amount: f64) -> Vec<f64> {
    let blurred = smooth(plane, h, w, 3);
    plane
        .iter()
        .zip(&blurred)
        .map(|(x, b)| x + amount * (x - b))
        .collect()
}

/// Sobel gradient magnitude.
pub fn sobel(plane: &[f64], h: usize, w: usize) -> Vec<f64> {
    if h == 0 || w == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(plane.len());
    for y in 0..h as isize {
        for x in 0..w as isize {
            let p = |dy: isize, dx: isize| at(plane, h, w, y + dy, x + dx);
            let gx = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let gy = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            out.push(gx.hypot(gy));
        }
    }
    out
}
