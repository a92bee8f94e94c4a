//! Gallery scan: score every candidate against the query and keep the global minimum.
//!
//! Each candidate produces an explicit `Result<f64, CandidateError>`; failures are
//! recorded and the scan moves on. The running best is keyed by `(score, index)` where
//! `index` is the candidate's position in the supplied order, so an exact tie always
//! resolves to the first-encountered candidate, sequential or parallel.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use alignreid_vision::{AlignedDistanceScorer, PartDescriptorSet, Pipeline, VisionError};
use log::{debug, error, warn};
use thiserror::Error;

/// Produces the descriptor set for one gallery entry.
pub trait DescriptorSource: Send + Sync {
    fn describe(&self, path: &Path) -> Result<PartDescriptorSet, VisionError>;
}

impl DescriptorSource for Pipeline {
    fn describe(&self, path: &Path) -> Result<PartDescriptorSet, VisionError> {
        self.describe_path(path)
    }
}

#[derive(Debug, Error)]
pub enum CandidateError {
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("panicked while describing: {0}")]
    Panicked(String),
    #[error("score is not finite")]
    NonFiniteScore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub path: PathBuf,
    pub score: f64,
}

#[derive(Debug)]
pub struct CandidateFailure {
    pub path: PathBuf,
    pub error: CandidateError,
}

/// Outcome of a full gallery scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// `None` when the gallery was empty or no candidate could be scored.
    pub best: Option<MatchCandidate>,
    /// Failures in supplied order.
    pub failures: Vec<CandidateFailure>,
    pub scored: usize,
}

#[derive(Debug)]
struct Best {
    index: usize,
    candidate: MatchCandidate,
}

#[derive(Debug, Default)]
struct Accumulator {
    best: Option<Best>,
    failures: Vec<(usize, CandidateFailure)>,
    scored: usize,
}

impl Accumulator {
    fn observe(&mut self, index: usize, path: &Path, outcome: Result<f64, CandidateError>) {
        match outcome {
            Ok(score) => {
                debug!("{}: aligned distance {:.6}", path.display(), score);
                self.scored += 1;
                self.offer(Best {
                    index,
                    candidate: MatchCandidate {
                        path: path.to_path_buf(),
                        score,
                    },
                });
            }
            Err(error) => {
                warn!("skipping {}: {}", path.display(), error);
                self.failures.push((
                    index,
                    CandidateFailure {
                        path: path.to_path_buf(),
                        error,
                    },
                ));
            }
        }
    }

    fn offer(&mut self, challenger: Best) {
        let replace = match &self.best {
            None => true,
            Some(current) => beats(&challenger, current),
        };
        if replace {
            self.best = Some(challenger);
        }
    }

    fn merge(mut self, other: Accumulator) -> Accumulator {
        if let Some(best) = other.best {
            self.offer(best);
        }
        self.failures.extend(other.failures);
        self.scored += other.scored;
        self
    }

    fn finish(mut self) -> ScanReport {
        self.failures.sort_by_key(|(index, _)| *index);
        ScanReport {
            best: self.best.map(|b| b.candidate),
            failures: self.failures.into_iter().map(|(_, f)| f).collect(),
            scored: self.scored,
        }
    }
}

/// Strictly lower score wins; equal scores fall back to supplied order.
fn beats(challenger: &Best, current: &Best) -> bool {
    let (a, b) = (challenger.candidate.score, current.candidate.score);
    a < b || (a == b && challenger.index < current.index)
}

/// Rejects a query descriptor set the scorer could never compare against.
pub fn validate_query(
    scorer: &AlignedDistanceScorer,
    query: &PartDescriptorSet,
) -> Result<(), VisionError> {
    scorer.score(query, query).map(|_| ())
}

/// Describes and scores one candidate. A panic inside the source is caught and
/// recorded against that candidate only.
fn evaluate<S>(
    source: &S,
    scorer: &AlignedDistanceScorer,
    query: &PartDescriptorSet,
    path: &Path,
) -> Result<f64, CandidateError>
where
    S: DescriptorSource + ?Sized,
{
    let described = panic::catch_unwind(AssertUnwindSafe(|| source.describe(path)))
        .map_err(|payload| CandidateError::Panicked(panic_message(payload.as_ref())))?;
    let score = scorer.score(query, &described?)?;
    if !score.is_finite() {
        return Err(CandidateError::NonFiniteScore);
    }
    Ok(score)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sequential scan in supplied order. Entries equal to `query_id` are skipped.
pub fn scan<S>(
    query_id: &Path,
    query: &PartDescriptorSet,
    candidates: &[PathBuf],
    source: &S,
    scorer: &AlignedDistanceScorer,
) -> ScanReport
where
    S: DescriptorSource + ?Sized,
{
    let mut acc = Accumulator::default();
    for (index, path) in candidates.iter().enumerate() {
        if path == query_id {
            debug!("skipping query image {}", path.display());
            continue;
        }
        acc.observe(index, path, evaluate(source, scorer, query, path));
    }
    acc.finish()
}

/// Worker-pool scan. Each worker keeps a private best; the merge uses the same
/// `(score, index)` ordering as [`scan`], so both always pick the same winner.
///
/// Per-candidate time bounds belong to the source (see `TimedExtractor`), which
/// starts the clock when inference begins rather than when a worker queues for it.
pub fn scan_parallel<S>(
    query_id: &Path,
    query: &PartDescriptorSet,
    candidates: &[PathBuf],
    source: &S,
    scorer: &AlignedDistanceScorer,
    workers: usize,
) -> ScanReport
where
    S: DescriptorSource + ?Sized,
{
    let workers = workers.clamp(1, candidates.len().max(1));

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, &Path)>();
    for (index, path) in candidates.iter().enumerate() {
        // receiver is alive until the scope below ends
        let _ = job_tx.send((index, path.as_path()));
    }
    drop(job_tx);

    let acc = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let job_rx = job_rx.clone();
                scope.spawn(move || {
                    let mut acc = Accumulator::default();
                    for (index, path) in job_rx {
                        if path == query_id {
                            debug!("skipping query image {}", path.display());
                            continue;
                        }
                        acc.observe(index, path, evaluate(source, scorer, query, path));
                    }
                    acc
                })
            })
            .collect();

        handles
            .into_iter()
            .fold(Accumulator::default(), |acc, handle| match handle.join() {
                Ok(worker) => acc.merge(worker),
                Err(_) => {
                    // evaluate() catches source panics; this is a bug in the scan itself
                    error!("scan worker panicked, its candidates are lost");
                    acc
                }
            })
    });

    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use std::collections::HashMap;

    enum Entry {
        Set(PartDescriptorSet),
        Panics,
        Unreadable,
        Malformed,
    }

    #[derive(Default)]
    struct Table(HashMap<PathBuf, Entry>);

    impl Table {
        fn with(mut self, name: &str, entry: Entry) -> Self {
            self.0.insert(PathBuf::from(name), entry);
            self
        }
    }

    impl DescriptorSource for Table {
        fn describe(&self, path: &Path) -> Result<PartDescriptorSet, VisionError> {
            match self.0.get(path) {
                Some(Entry::Set(set)) => Ok(set.clone()),
                Some(Entry::Panics) => panic!("decoder bug on {}", path.display()),
                Some(Entry::Malformed) => Ok(PartDescriptorSet::from_rows(Array2::ones((5, 2)))),
                Some(Entry::Unreadable) | None => Err(VisionError::Read {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
                }),
            }
        }
    }

    fn query() -> PartDescriptorSet {
        at_distance(0.0)
    }

    /// Every row sits at euclidean distance `d` from every query row.
    fn at_distance(d: f64) -> PartDescriptorSet {
        let theta = 2.0 * (d / 2.0).asin();
        let row = [theta.cos() as f32, theta.sin() as f32];
        PartDescriptorSet::from_rows(Array2::from_shape_fn((8, 2), |(_, j)| row[j]))
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn run(table: &Table, names: &[&str]) -> ScanReport {
        scan(
            Path::new("Q.jpg"),
            &query(),
            &paths(names),
            table,
            &AlignedDistanceScorer::default(),
        )
    }

    #[test]
    fn test_picks_lowest_score_and_skips_unreadable() {
        let table = Table::default()
            .with("A.jpg", Entry::Set(at_distance(0.10)))
            .with("B.jpg", Entry::Set(at_distance(0.05)))
            .with("C.jpg", Entry::Unreadable);

        let report = run(&table, &["A.jpg", "B.jpg", "C.jpg"]);
        let best = report.best.unwrap();
        assert_eq!(best.path, PathBuf::from("B.jpg"));
        assert_abs_diff_eq!(best.score, 0.05, epsilon = 1e-6);
        assert_eq!(report.scored, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("C.jpg"));
        assert!(matches!(
            report.failures[0].error,
            CandidateError::Vision(VisionError::Read { .. })
        ));
    }

    #[test]
    fn test_unique_minimum_wins_in_any_order() {
        let table = Table::default()
            .with("a", Entry::Set(at_distance(0.4)))
            .with("b", Entry::Set(at_distance(0.2)))
            .with("c", Entry::Set(at_distance(0.9)))
            .with("d", Entry::Set(at_distance(0.3)));

        for order in [
            ["a", "b", "c", "d"],
            ["d", "c", "b", "a"],
            ["b", "a", "d", "c"],
            ["c", "d", "a", "b"],
        ] {
            let best = run(&table, &order).best.unwrap();
            assert_eq!(best.path, PathBuf::from("b"));
        }
    }

    #[test]
    fn test_tie_keeps_first_encountered() {
        let table = Table::default()
            .with("x", Entry::Set(at_distance(0.3)))
            .with("y", Entry::Set(at_distance(0.3)))
            .with("z", Entry::Set(at_distance(0.5)));

        assert_eq!(run(&table, &["x", "y", "z"]).best.unwrap().path, PathBuf::from("x"));
        assert_eq!(run(&table, &["z", "y", "x"]).best.unwrap().path, PathBuf::from("y"));
    }

    #[test]
    fn test_query_is_never_its_own_match() {
        let table = Table::default()
            .with("Q.jpg", Entry::Set(query()))
            .with("A.jpg", Entry::Set(at_distance(0.7)));

        let report = run(&table, &["A.jpg", "Q.jpg"]);
        assert_eq!(report.best.unwrap().path, PathBuf::from("A.jpg"));
        assert_eq!(report.scored, 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_empty_gallery_is_no_match() {
        let report = run(&Table::default(), &[]);
        assert!(report.best.is_none());
        assert!(report.failures.is_empty());
        assert_eq!(report.scored, 0);
    }

    #[test]
    fn test_all_failures_is_no_match() {
        let table = Table::default()
            .with("a", Entry::Unreadable)
            .with("b", Entry::Malformed);

        let report = run(&table, &["a", "b"]);
        assert!(report.best.is_none());
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            report.failures[1].error,
            CandidateError::Vision(VisionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut table = Table::default();
        let mut names = Vec::new();
        for i in 0..40 {
            let name = format!("img{i:02}.jpg");
            let entry = match i % 7 {
                3 => Entry::Unreadable,
                5 => Entry::Malformed,
                // several exact ties at the minimum
                _ => Entry::Set(at_distance(0.1 + (i % 4) as f64 * 0.05)),
            };
            table = table.with(&name, entry);
            names.push(name);
        }
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let candidates = paths(&names);
        let scorer = AlignedDistanceScorer::default();

        let sequential = run(&table, &names);
        for workers in [1, 2, 3, 8, 64] {
            for _ in 0..5 {
                let parallel = scan_parallel(
                    Path::new("Q.jpg"),
                    &query(),
                    &candidates,
                    &table,
                    &scorer,
                    workers,
                );
                assert_eq!(parallel.best, sequential.best);
                assert_eq!(parallel.scored, sequential.scored);
                let failed: Vec<_> = parallel.failures.iter().map(|f| &f.path).collect();
                let expected: Vec<_> = sequential.failures.iter().map(|f| &f.path).collect();
                assert_eq!(failed, expected);
            }
        }
        assert_eq!(sequential.best.unwrap().path, PathBuf::from("img00.jpg"));
    }

    #[test]
    fn test_panicking_candidate_is_isolated() {
        let table = Table::default()
            .with("a", Entry::Set(at_distance(0.4)))
            .with("b", Entry::Panics)
            .with("c", Entry::Set(at_distance(0.1)))
            .with("d", Entry::Set(at_distance(0.2)));
        let names = ["a", "b", "c", "d"];
        let scorer = AlignedDistanceScorer::default();

        let sequential = run(&table, &names);
        assert_eq!(sequential.best.as_ref().unwrap().path, PathBuf::from("c"));
        assert_eq!(sequential.scored, 3);
        assert_eq!(sequential.failures.len(), 1);
        match &sequential.failures[0].error {
            CandidateError::Panicked(msg) => assert!(msg.contains("decoder bug")),
            other => panic!("unexpected failure {other}"),
        }

        for workers in [2, 4] {
            let parallel = scan_parallel(
                Path::new("Q.jpg"),
                &query(),
                &paths(&names),
                &table,
                &scorer,
                workers,
            );
            assert_eq!(parallel.best, sequential.best);
            assert_eq!(parallel.scored, 3);
            assert_eq!(parallel.failures.len(), 1);
        }
    }

    #[test]
    fn test_validate_query() {
        let scorer = AlignedDistanceScorer::default();
        assert!(validate_query(&scorer, &query()).is_ok());

        let short = PartDescriptorSet::from_rows(Array2::ones((5, 2)));
        assert!(matches!(
            validate_query(&scorer, &short),
            Err(VisionError::ShapeMismatch {
                expected: (8, 2),
                actual: (5, 2)
            })
        ));
    }
}
