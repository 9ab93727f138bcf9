use crate::search::alphabet::Alphabet;
use anyhow::{bail, Context, Result};

/// Dense substitution matrix kept in two widths: i16 for the lane-parallel
/// aligner and i64 for the scalar aligners and statistics.
///
/// Row 0 and column 0 belong to the gap/unknown symbol and always score 0.
#[derive(Debug, Clone)]
pub struct ScoreMatrix {
    alphabet: Alphabet,
    dim: usize,
    mat16: Vec<i16>,
    mat64: Vec<i64>,
}

impl ScoreMatrix {
    /// Constant match/mismatch scoring over every non-zero symbol pair.
    pub fn constant(alphabet: Alphabet, match_score: i64, mismatch_score: i64) -> Self {
        let dim = alphabet.dim();
        let mut m = ScoreMatrix {
            alphabet,
            dim,
            mat16: vec![0; dim * dim],
            mat64: vec![0; dim * dim],
        };
        for a in 1..dim {
            for b in 1..dim {
                m.set(a, b, if a == b { match_score } else { mismatch_score });
            }
        }
        m
    }

    /// Parse an amino-acid matrix in the classic text layout: a header
    /// line listing the symbol order, then one row of scores per symbol.
    pub fn from_text(text: &str) -> Result<Self> {
        let dim = Alphabet::AminoAcid.dim();
        let mut m = ScoreMatrix {
            alphabet: Alphabet::AminoAcid,
            dim,
            mat16: vec![0; dim * dim],
            mat64: vec![0; dim * dim],
        };

        let mut order: Vec<u8> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if order.is_empty() {
                // header row with the symbol order
                order = line
                    .split_whitespace()
                    .map(|tok| tok.as_bytes()[0])
                    .collect();
                continue;
            }
            let mut fields = line.split_whitespace();
            let sym = fields
                .next()
                .context("matrix row missing its symbol column")?
                .as_bytes()[0];
            let a = Alphabet::AminoAcid.map(sym) as usize;
            for (i, tok) in fields.enumerate() {
                if i >= order.len() {
                    bail!("matrix row for '{}' has too many columns", sym as char);
                }
                let b = Alphabet::AminoAcid.map(order[i]) as usize;
                let sc: i64 = tok
                    .parse()
                    .context(format!("bad score '{}' in matrix row '{}'", tok, sym as char))?;
                if a != 0 && b != 0 {
                    m.set(a, b, sc);
                }
            }
        }
        if order.is_empty() {
            bail!("empty substitution matrix");
        }
        Ok(m)
    }

    /// The built-in BLOSUM62 matrix.
    pub fn blosum62() -> Self {
        // unwrap is safe: the embedded text is well formed
        ScoreMatrix::from_text(BLOSUM62).expect("built-in BLOSUM62 must parse")
    }

    fn set(&mut self, a: usize, b: usize, score: i64) {
        self.mat64[a * self.dim + b] = score;
        self.mat16[a * self.dim + b] = score as i16;
    }

    #[inline(always)]
    pub fn score16(&self, a: usize, b: usize) -> i16 {
        self.mat16[a * self.dim + b]
    }

    #[inline(always)]
    pub fn score64(&self, a: usize, b: usize) -> i64 {
        self.mat64[a * self.dim + b]
    }

    /// Score of two raw sequence bytes under this matrix.
    #[inline(always)]
    pub fn score_bytes(&self, a: u8, b: u8) -> i64 {
        self.score64(self.alphabet.map(a) as usize, self.alphabet.map(b) as usize)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }
}

/// The six (open, extend) penalty pairs: query/target axis crossed with
/// the left / interior / right regions. Stored non-negative; the aligners
/// subtract them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapModel {
    pub open_query_left: i64,
    pub open_query_interior: i64,
    pub open_query_right: i64,
    pub open_target_left: i64,
    pub open_target_interior: i64,
    pub open_target_right: i64,
    pub extend_query_left: i64,
    pub extend_query_interior: i64,
    pub extend_query_right: i64,
    pub extend_target_left: i64,
    pub extend_target_interior: i64,
    pub extend_target_right: i64,
}

impl GapModel {
    /// One (open, extend) pair applied to every axis and region.
    pub fn uniform(open: i64, extend: i64) -> Self {
        GapModel {
            open_query_left: open,
            open_query_interior: open,
            open_query_right: open,
            open_target_left: open,
            open_target_interior: open,
            open_target_right: open,
            extend_query_left: extend,
            extend_query_interior: extend,
            extend_query_right: extend,
            extend_target_left: extend,
            extend_target_interior: extend,
            extend_target_right: extend,
        }
    }

    /// Largest open+extend sum across all regimes; the 16-bit aligner uses
    /// it to place its overflow floor.
    pub fn max_total_penalty(&self) -> i64 {
        [
            self.open_query_left + self.extend_query_left,
            self.open_query_interior + self.extend_query_interior,
            self.open_query_right + self.extend_query_right,
            self.open_target_left + self.extend_target_left,
            self.open_target_interior + self.extend_target_interior,
            self.open_target_right + self.extend_target_right,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

const BLOSUM62: &str = "\
   A  R  N  D  C  Q  E  G  H  I  L  K  M  F  P  S  T  W  Y  V  B  J  Z  X  *
A  4 -1 -2 -2  0 -1 -1  0 -2 -1 -1 -1 -1 -2 -1  1  0 -3 -2  0 -2 -1 -1 -1 -4
R -1  5  0 -2 -3  1  0 -2  0 -3 -2  2 -1 -3 -2 -1 -1 -3 -2 -3 -1 -2  0 -1 -4
N -2  0  6  1 -3  0  0  0  1 -3 -3  0 -2 -3 -2  1  0 -4 -2 -3  4 -3  0 -1 -4
D -2 -2  1  6 -3  0  2 -1 -1 -3 -4 -1 -3 -3 -1  0 -1 -4 -3 -3  4 -3  1 -1 -4
C  0 -3 -3 -3  9 -3 -4 -3 -3 -1 -1 -3 -1 -2 -3 -1 -1 -2 -2 -1 -3 -1 -3 -1 -4
Q -1  1  0  0 -3  5  2 -2  0 -3 -2  1  0 -3 -1  0 -1 -2 -1 -2  0 -2  4 -1 -4
E -1  0  0  2 -4  2  5 -2  0 -3 -3  1 -2 -3 -1  0 -1 -3 -2 -2  1 -3  4 -1 -4
G  0 -2  0 -1 -3 -2 -2  6 -2 -4 -4 -2 -3 -3 -2  0 -2 -2 -3 -3 -1 -4 -2 -1 -4
H -2  0  1 -1 -3  0  0 -2  8 -3 -3 -1 -2 -1 -2 -1 -2 -2  2 -3  0 -3  0 -1 -4
I -1 -3 -3 -3 -1 -3 -3 -4 -3  4  2 -3  1  0 -3 -2 -1 -3 -1  3 -3  3 -3 -1 -4
L -1 -2 -3 -4 -1 -2 -3 -4 -3  2  4 -2  2  0 -3 -2 -1 -2 -1  1 -4  3 -3 -1 -4
K -1  2  0 -1 -3  1  1 -2 -1 -3 -2  5 -1 -3 -1  0 -1 -3 -2 -2  0 -3  1 -1 -4
M -1 -1 -2 -3 -1  0 -2 -3 -2  1  2 -1  5  0 -2 -1 -1 -1 -1  1 -3  2 -1 -1 -4
F -2 -3 -3 -3 -2 -3 -3 -3 -1  0  0 -3  0  6 -4 -2 -2  1  3 -1 -3  0 -3 -1 -4
P -1 -2 -2 -1 -3 -1 -1 -2 -2 -3 -3 -1 -2 -4  7 -1 -1 -4 -3 -2 -2 -3 -1 -1 -4
S  1 -1  1  0 -1  0  0  0 -1 -2 -2  0 -1 -2 -1  4  1 -3 -2 -2  0 -2  0 -1 -4
T  0 -1  0 -1 -1 -1 -1 -2 -2 -1 -1 -1 -1 -2 -1  1  5 -2 -2  0 -1 -1 -1 -1 -4
W -3 -3 -4 -4 -2 -2 -3 -2 -2 -3 -2 -3 -1  1 -4 -3 -2 11  2 -3 -4 -2 -2 -1 -4
Y -2 -2 -2 -3 -2 -1 -2 -3  2 -1 -1 -2 -1  3 -3 -2 -2  2  7 -1 -3 -1 -2 -1 -4
V  0 -3 -3 -3 -1 -2 -2 -3 -3  3  1 -2  1 -1 -2 -2  0 -3 -1  4 -3  2 -2 -1 -4
B -2 -1  4  4 -3  0  1 -1  0 -3 -4  0 -3 -3 -2  0 -1 -4 -3 -3  4 -3  0 -1 -4
J -1 -2 -3 -3 -1 -2 -3 -4 -3  3  3 -3  2  0 -3 -2 -1 -2 -1  2 -3  3 -3 -1 -4
Z -1  0  0  1 -3  4  4 -2  0 -3 -3  1 -1 -3 -1  0 -1 -2 -2 -2  0 -3  4 -1 -4
X -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -4
* -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4  1
";
