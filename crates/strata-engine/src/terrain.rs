//! Cell payload for the demo world: a column of rock, loose sediment, and
//! surface water.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use strata_grid::{Datum, RenderSource};

/// Highest elevation produced by the initial terrain.
pub const MAX_ELEVATION: f64 = 1_000.0;

/// One grid cell of the demo world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Terrain {
    /// Height of bedrock plus sediment, in metres.
    pub elevation: f64,
    /// Loose material deposited on top of the bedrock, in metres.
    pub sediment: f64,
    /// Standing water, in millimetres.
    pub water: f64,
}

impl Terrain {
    /// Flat dry cell at `elevation`.
    pub const fn at(elevation: f64) -> Self {
        Self {
            elevation,
            sediment: 0.0,
            water: 0.0,
        }
    }
}

impl RenderSource for Terrain {
    fn render_settings(&self) -> Vec<Datum> {
        vec![
            Datum::Scalar(self.elevation),
            Datum::Color(shade(self.elevation, self.water)),
            Datum::Label(band(self.elevation).to_owned()),
        ]
    }
}

/// Greyscale by elevation, blue tint where water stands.
fn shade(elevation: f64, water: f64) -> [u8; 3] {
    let level = (elevation / MAX_ELEVATION).clamp(0.0, 1.0) * 255.0;
    // `level` is clamped to 0..=255, so the conversion cannot truncate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let grey = level.round() as u8;
    if water > 0.0 {
        [grey, grey, grey.saturating_add(64)]
    } else {
        [grey, grey, grey]
    }
}

fn band(elevation: f64) -> &'static str {
    match elevation {
        e if e < 200.0 => "lowland",
        e if e < 600.0 => "upland",
        _ => "highland",
    }
}

/// Cell factory producing reproducible random terrain from `seed`.
pub fn generator(seed: u64) -> impl FnMut(usize, usize) -> Terrain {
    let mut rng = StdRng::seed_from_u64(seed);
    move |_x, _y| Terrain::at(rng.random_range(0.0..MAX_ELEVATION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_is_reproducible() {
        let mut a = generator(7);
        let mut b = generator(7);
        for i in 0..16 {
            assert_eq!(a(i, 0), b(i, 0));
        }
    }

    #[test]
    fn generated_elevations_are_in_range() {
        let mut g = generator(1);
        for i in 0..64 {
            let t = g(i, i);
            assert!((0.0..MAX_ELEVATION).contains(&t.elevation));
            assert!(t.sediment.abs() < f64::EPSILON);
        }
    }

    #[test]
    fn render_settings_describe_the_cell() {
        let settings = Terrain::at(100.0).render_settings();
        assert_eq!(settings.len(), 3);
        assert_eq!(settings.first(), Some(&Datum::Scalar(100.0)));
        assert_eq!(settings.last(), Some(&Datum::Label("lowland".to_owned())));
        assert_eq!(band(900.0), "highland");
    }

    #[test]
    fn standing_water_tints_blue() {
        let dry = Terrain::at(500.0);
        let wet = Terrain {
            water: 2.0,
            ..dry
        };
        assert_eq!(shade(dry.elevation, dry.water), [128, 128, 128]);
        assert_eq!(shade(wet.elevation, wet.water), [128, 128, 192]);
        assert_ne!(dry.render_settings(), wet.render_settings());
    }
}
