//! Roster matching — nearest enrolled identity by Euclidean distance.

use crate::types::{Embedding, Enrollment};

/// Result of matching a probe embedding against a class roster.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterMatch {
    pub student_id: String,
    pub full_name: String,
    pub roll_no: String,
    pub distance: f32,
}

/// Strategy for matching a probe embedding against a roster.
pub trait Matcher {
    /// Return the closest enrolled identity strictly under `threshold`,
    /// or `None` if the roster is empty or nothing is close enough.
    fn best_match(
        &self,
        probe: &Embedding,
        roster: &[Enrollment],
        threshold: f32,
    ) -> Option<RosterMatch>;
}

/// Euclidean nearest-neighbour matcher.
///
/// Iterates the full roster, keeps the minimum distance, and accepts only a
/// strict `distance < threshold`. Equidistant candidates resolve to the first
/// in roster order. Entries whose embedding dimension differs from the probe
/// are skipped rather than failing the scan; session start validates the
/// roster, so a skip here means the probe came from a different provider
/// model than the enrollments.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        roster: &[Enrollment],
        threshold: f32,
    ) -> Option<RosterMatch> {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in roster.iter().enumerate() {
            if entry.embedding.dim() != probe.dim() {
                tracing::debug!(
                    student_id = %entry.student_id,
                    probe_dim = probe.dim(),
                    entry_dim = entry.embedding.dim(),
                    "skipping roster entry with mismatched embedding dimension"
                );
                continue;
            }

            let distance = probe.euclidean_distance(&entry.embedding);
            // Strict less-than keeps the earliest entry on ties.
            let is_better = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance < threshold => {
                let entry = &roster[idx];
                Some(RosterMatch {
                    student_id: entry.student_id.clone(),
                    full_name: entry.full_name.clone(),
                    roll_no: entry.roll_no.clone(),
                    distance,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment(id: &str, values: Vec<f32>) -> Enrollment {
        Enrollment {
            student_id: id.into(),
            full_name: format!("Student {id}"),
            roll_no: format!("R-{id}"),
            embedding: Embedding::new(values),
            embedding_version: 1,
        }
    }

    #[test]
    fn test_exact_match_at_distance_zero() {
        let probe = Embedding::new(vec![0.1, 0.2, 0.3]);
        let roster = vec![enrollment("a", vec![0.1, 0.2, 0.3])];

        let m = EuclideanMatcher
            .best_match(&probe, &roster, 0.6)
            .expect("exact copy must match under any positive threshold");
        assert_eq!(m.student_id, "a");
        assert_eq!(m.distance, 0.0);
    }

    #[test]
    fn test_empty_roster_is_none() {
        let probe = Embedding::new(vec![0.0; 4]);
        assert!(EuclideanMatcher.best_match(&probe, &[], 0.6).is_none());
    }

    #[test]
    fn test_threshold_is_strict() {
        // Probe at Euclidean distance exactly 0.5 from the only entry.
        let probe = Embedding::new(vec![0.5, 0.0]);
        let roster = vec![enrollment("a", vec![0.0, 0.0])];

        assert!(EuclideanMatcher.best_match(&probe, &roster, 0.5).is_none());
        assert!(EuclideanMatcher
            .best_match(&probe, &roster, 0.5 + 1e-4)
            .is_some());
    }

    #[test]
    fn test_minimum_distance_wins() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let roster = vec![
            enrollment("far", vec![0.4, 0.0]),
            enrollment("near", vec![0.1, 0.0]),
            enrollment("mid", vec![0.2, 0.0]),
        ];

        let m = EuclideanMatcher.best_match(&probe, &roster, 0.6).unwrap();
        assert_eq!(m.student_id, "near");
    }

    #[test]
    fn test_tie_break_first_in_roster_order() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let roster = vec![
            enrollment("first", vec![0.1, 0.0]),
            enrollment("second", vec![-0.1, 0.0]),
        ];

        let m = EuclideanMatcher.best_match(&probe, &roster, 0.6).unwrap();
        assert_eq!(m.student_id, "first");
    }

    #[test]
    fn test_mismatched_dimension_entry_is_skipped() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let roster = vec![
            enrollment("bad", vec![0.0, 0.0, 0.0]),
            enrollment("good", vec![0.1, 0.0]),
        ];

        let m = EuclideanMatcher.best_match(&probe, &roster, 0.6).unwrap();
        assert_eq!(m.student_id, "good");
    }

    #[test]
    fn test_all_entries_mismatched_is_none() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let roster = vec![enrollment("bad", vec![0.0; 3])];
        assert!(EuclideanMatcher.best_match(&probe, &roster, 0.6).is_none());
    }

    #[test]
    fn test_noisy_embedding_still_matches() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let base: Vec<f32> = (0..128).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let noisy: Vec<f32> = base.iter().map(|v| v + rng.gen_range(-0.01..0.01)).collect();

        let roster = vec![
            enrollment("target", base),
            enrollment("decoy", (0..128).map(|_| rng.gen_range(-1.0..1.0)).collect()),
        ];

        let m = EuclideanMatcher
            .best_match(&Embedding::new(noisy), &roster, 0.6)
            .unwrap();
        assert_eq!(m.student_id, "target");
    }
}
