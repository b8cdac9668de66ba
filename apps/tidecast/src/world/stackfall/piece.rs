use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use rand::Rng;

/// Relative block coordinate; y grows downward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One falling piece: a shape instance at a board position with a color.
#[derive(Clone, Debug)]
pub struct Piece {
    pub kind: &'static str,
    /// Block offsets relative to the rotation origin.
    pub blocks: Vec<Point>,
    pub x: i32,
    pub y: i32,
    pub color: u8,
}

impl Piece {
    pub fn new(kind: &'static str, x: i32, y: i32, color: u8) -> Self {
        Self {
            kind,
            blocks: SHAPES[kind].clone(),
            x,
            y,
            color,
        }
    }

    pub fn random(rng: &mut impl Rng, x: i32, y: i32) -> Self {
        Self::new(random_kind(rng), x, y, random_color(rng))
    }

    /// Absolute board coordinates of every block.
    pub fn cells(&self) -> impl Iterator<Item = Point> + '_ {
        self.blocks.iter().map(|b| Point {
            x: self.x + b.x,
            y: self.y + b.y,
        })
    }

    /// Rotate a quarter turn clockwise around the origin: `(x, y) -> (-y, x)`.
    pub fn rotate_cw(&mut self) {
        for b in &mut self.blocks {
            (b.x, b.y) = (-b.y, b.x);
        }
    }

    /// Inverse of [`Piece::rotate_cw`].
    pub fn rotate_ccw(&mut self) {
        for b in &mut self.blocks {
            (b.x, b.y) = (b.y, -b.x);
        }
    }
}

// ANSI-256 color cube plus grayscale, skipping the basic 16.
// https://en.wikipedia.org/wiki/ANSI_escape_code#8-bit
pub const COLOR_MIN: u8 = 17;
pub const COLOR_MAX: u8 = 231;

pub fn random_color(rng: &mut impl Rng) -> u8 {
    rng.gen_range(COLOR_MIN..=COLOR_MAX)
}

pub fn random_kind(rng: &mut impl Rng) -> &'static str {
    SHAPE_KEYS[rng.gen_range(0..SHAPE_KEYS.len())]
}

/// Shape catalog in visual form. Each line of a declaration starts with a
/// `|` border; `O` marks a block and `X` the rotation origin.
const SHAPE_DEFS: &[(&str, &str)] = &[
    (
        "straight4",
        "
|OXOO
",
    ),
    (
        "box",
        "
|XO
|OO
",
    ),
    (
        "halfx",
        "
|OXO
| O
",
    ),
    (
        "bend-right",
        "
|OXO
|  O
",
    ),
    (
        "bend-left",
        "
|OXO
|O
",
    ),
    (
        "box-zigr",
        "
| XO
|OO
",
    ),
    (
        "box-zigl",
        "
|OX
| OO
",
    ),
    (
        "Q",
        "
|OXO
|OO
",
    ),
];

/// Parsed catalog, keyed in sorted order so random selection is stable
/// across runs and platforms.
pub static SHAPES: Lazy<BTreeMap<&'static str, Vec<Point>>> = Lazy::new(|| {
    SHAPE_DEFS
        .iter()
        .map(|(kind, visual)| {
            let blocks = parse_visual(visual)
                .unwrap_or_else(|err| panic!("shape {kind}: {err}"));
            (*kind, blocks)
        })
        .collect()
});

pub static SHAPE_KEYS: Lazy<Vec<&'static str>> = Lazy::new(|| SHAPES.keys().copied().collect());

/// Bounding box over every catalog shape, used to size piece previews.
pub static SHAPE_RANGE: Lazy<(Point, Point)> = Lazy::new(|| {
    let mut min = Point { x: 0, y: 0 };
    let mut max = Point { x: 0, y: 0 };
    for blocks in SHAPES.values() {
        for b in blocks {
            min.x = min.x.min(b.x);
            min.y = min.y.min(b.y);
            max.x = max.x.max(b.x);
            max.y = max.y.max(b.y);
        }
    }
    (min, max)
});

/// Convert a visual declaration into block offsets relative to the `X`
/// origin.
fn parse_visual(visual: &str) -> Result<Vec<Point>, String> {
    let rows: Vec<&str> = visual
        .lines()
        .filter_map(|line| line.strip_prefix('|'))
        .collect();

    let mut origin = None;
    for (y, row) in rows.iter().enumerate() {
        for (x, ch) in row.chars().enumerate() {
            if ch == 'X' {
                origin = Some((x as i32, y as i32));
            }
        }
    }
    let (ox, oy) = origin.ok_or_else(|| "no origin 'X' found".to_string())?;

    let mut blocks = Vec::new();
    for (y, row) in rows.iter().enumerate() {
        for (x, ch) in row.chars().enumerate() {
            if ch == 'O' || ch == 'X' {
                blocks.push(Point {
                    x: x as i32 - ox,
                    y: y as i32 - oy,
                });
            }
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn catalog_parses_with_origin_at_zero() {
        for (kind, blocks) in SHAPES.iter() {
            assert!(
                blocks.contains(&Point { x: 0, y: 0 }),
                "{kind} should contain its origin"
            );
            assert!(blocks.len() >= 4, "{kind} has {} blocks", blocks.len());
        }
    }

    #[test]
    fn parse_visual_positions_relative_to_origin() {
        let blocks = parse_visual("\n|OX\n| O\n").expect("parse");
        assert_eq!(
            blocks,
            vec![
                Point { x: -1, y: 0 },
                Point { x: 0, y: 0 },
                Point { x: 0, y: 1 },
            ]
        );
    }

    #[test]
    fn parse_visual_requires_origin() {
        assert!(parse_visual("\n|OO\n").is_err());
    }

    #[test]
    fn four_cw_rotations_are_identity() {
        let mut piece = Piece::new("halfx", 0, 0, 30);
        let original = piece.blocks.clone();
        for _ in 0..4 {
            piece.rotate_cw();
        }
        assert_eq!(piece.blocks, original);
    }

    #[test]
    fn ccw_undoes_cw() {
        let mut piece = Piece::new("bend-left", 0, 0, 30);
        let original = piece.blocks.clone();
        piece.rotate_cw();
        piece.rotate_ccw();
        assert_eq!(piece.blocks, original);
    }

    #[test]
    fn random_color_stays_in_palette() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let c = random_color(&mut rng);
            assert!((COLOR_MIN..=COLOR_MAX).contains(&c));
        }
    }
}
