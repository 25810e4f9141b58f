//! Elo rating updates.
//!
//! The two-player formula is standard Elo with K=24. Races with more than
//! two finishers are scored pairwise: each participant's delta is the sum of
//! its two-player deltas against every other opponent. Abandoned
//! participants still count as opponents but receive no delta themselves.

/// K-factor applied to every pairwise update.
const K: f64 = 24.0;

/// Rating delta for player A against player B given A's score
/// (1 win, 0.5 draw, 0 loss). Rounded to the nearest integer, ties away
/// from zero.
pub fn elo_delta(rating_a: i64, rating_b: i64, score: f64) -> i64 {
    let expected = 1.0 / (1.0 + 10f64.powf((rating_b - rating_a) as f64 / 400.0));
    (K * (score - expected)).round() as i64
}

/// One participant's standing at the end of a race, as seen by the rating
/// pass.
#[derive(Debug, Clone)]
pub struct Standing {
    pub rating: i64,
    pub rank: u32,
    pub abandoned: bool,
}

/// Compute the rating delta for every participant. Output is aligned with
/// the input slice. Abandoned participants always get 0.
pub fn race_deltas(standings: &[Standing]) -> Vec<i64> {
    standings
        .iter()
        .map(|a| {
            if a.abandoned {
                return 0;
            }
            standings
                .iter()
                .filter(|b| !std::ptr::eq(a, *b))
                .map(|b| {
                    let score = match a.rank.cmp(&b.rank) {
                        std::cmp::Ordering::Less => 1.0,
                        std::cmp::Ordering::Equal => 0.5,
                        std::cmp::Ordering::Greater => 0.0,
                    };
                    elo_delta(a.rating, b.rating, score)
                })
                .sum()
        })
        .collect()
}
