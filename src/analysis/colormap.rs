const LUT_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Viridis,
    Magma,
    Inferno,
    Greys,
    Classic,
}

impl Colormap {
    pub const ALL: &'static [Colormap] = &[
        Colormap::Viridis,
        Colormap::Magma,
        Colormap::Inferno,
        Colormap::Greys,
        Colormap::Classic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Colormap::Viridis => "viridis",
            Colormap::Magma => "magma",
            Colormap::Inferno => "inferno",
            Colormap::Greys => "greys",
            Colormap::Classic => "classic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    fn color(&self, t: f32) -> (f32, f32, f32) {
        let t = t.clamp(0.0, 1.0);
        match self {
            // Cubic fits of the matplotlib palettes
            Colormap::Viridis => (
                ((-1.33 * t + 1.62) * t + 0.27) * t + 0.04,
                ((0.57 * t - 1.30) * t + 1.42) * t + 0.01,
                ((-2.40 * t + 2.26) * t - 0.15) * t + 0.33,
            ),
            Colormap::Magma => (
                ((-2.10 * t + 3.30) * t - 0.22) * t,
                ((-0.73 * t - 0.39) * t + 1.14) * t - 0.01,
                ((0.69 * t - 2.49) * t + 2.13) * t + 0.16,
            ),
            Colormap::Inferno => (
                ((-1.83 * t + 2.96) * t + 0.03) * t,
                ((-0.84 * t + 0.03) * t + 0.82) * t - 0.01,
                ((2.36 * t - 4.80) * t + 2.76) * t + 0.17,
            ),
            Colormap::Greys => (t, t, t),
            Colormap::Classic => classic(t),
        }
    }
}

/// Black, purple, blue, green, yellow, orange, red.
fn classic(t: f32) -> (f32, f32, f32) {
    const STOPS: [(f32, f32, f32, f32); 7] = [
        (0.00, 0.00, 0.00, 0.00),
        (0.26, 0.27, 0.11, 0.42),
        (0.41, 0.17, 0.47, 0.92),
        (0.66, 0.34, 0.92, 0.22),
        (0.76, 0.88, 0.88, 0.12),
        (0.87, 1.00, 0.56, 0.10),
        (0.96, 1.00, 0.00, 0.00),
    ];

    let idx = STOPS
        .iter()
        .rposition(|s| t >= s.0)
        .unwrap_or(0);
    if idx >= STOPS.len() - 1 {
        let s = STOPS[STOPS.len() - 1];
        return (s.1, s.2, s.3);
    }

    let (p0, r0, g0, b0) = STOPS[idx];
    let (p1, r1, g1, b1) = STOPS[idx + 1];
    let k = ((t - p0) / (p1 - p0)).clamp(0.0, 1.0);
    (r0 + (r1 - r0) * k, g0 + (g1 - g0) * k, b0 + (b1 - b0) * k)
}

/// Pre-built RGBA table indexed by normalized intensity.
#[derive(Clone)]
pub struct ColorLut {
    table: Vec<[u8; 4]>,
}

impl ColorLut {
    pub fn new(colormap: Colormap, transparent: bool) -> Self {
        let table = (0..LUT_SIZE)
            .map(|i| {
                let t = i as f32 / (LUT_SIZE - 1) as f32;
                let (r, g, b) = colormap.color(t);
                let alpha = if transparent { t } else { 1.0 };
                [to_byte(r), to_byte(g), to_byte(b), to_byte(alpha)]
            })
            .collect();
        Self { table }
    }

    /// `t` is intensity in `[0, 1]`; out-of-range values clamp.
    #[inline(always)]
    pub fn lookup(&self, t: f32) -> [u8; 4] {
        let index = (t * (LUT_SIZE - 1) as f32).clamp(0.0, (LUT_SIZE - 1) as f32) as usize;
        self.table[index]
    }
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!(Colormap::from_name("Magma"), Some(Colormap::Magma));
        assert_eq!(Colormap::from_name("greys"), Some(Colormap::Greys));
        assert_eq!(Colormap::from_name("rainbow"), None);
    }

    #[test]
    fn greys_spans_black_to_white() {
        let lut = ColorLut::new(Colormap::Greys, false);
        assert_eq!(lut.lookup(0.0), [0, 0, 0, 255]);
        assert_eq!(lut.lookup(1.0), [255, 255, 255, 255]);
        assert_eq!(lut.lookup(7.0), [255, 255, 255, 255]);
    }

    #[test]
    fn transparent_maps_silence_to_zero_alpha() {
        let lut = ColorLut::new(Colormap::Viridis, true);
        assert_eq!(lut.lookup(0.0)[3], 0);
        assert_eq!(lut.lookup(1.0)[3], 255);
    }
}
