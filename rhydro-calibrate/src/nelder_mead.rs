//! Nelder-Mead downhill simplex.
//!
//! Coefficients: reflection 1, expansion 2, inside contraction 0.5, shrink 0.5. The
//! search stops after `max_iter` iterations, or once `max_stagnations` consecutive
//! iterations improved the best score by less than `no_improve_thr`.

use crate::config::{CalibrationConfig, ParameterRange};
use crate::result::CalibrationResult;
use crate::runner::{score_or_worst, ObjectiveRunner};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::timeseries::FloatValue;

const REFLECTION: FloatValue = 1.0;
const EXPANSION: FloatValue = 2.0;
const CONTRACTION: FloatValue = 0.5;
const SHRINK: FloatValue = 0.5;

type Vertex = (Vec<FloatValue>, FloatValue);

fn clip(point: &mut [FloatValue], bounds: &[Option<ParameterRange>]) {
    for (x, range) in point.iter_mut().zip(bounds) {
        if let Some((min, max)) = range {
            *x = x.clamp(*min, *max);
        }
    }
}

/// Starting vertices: `initial` followed by one Gaussian perturbation of it per parameter.
///
/// The perturbation of a parameter has a standard deviation of `sigma` times half its range
/// width, or `sigma · max(|p|, 1)` when it has no range.
pub fn initial_simplex<R: Rng>(
    initial: &[FloatValue],
    bounds: &[Option<ParameterRange>],
    sigma: FloatValue,
    limit: bool,
    rng: &mut R,
) -> Vec<Vec<FloatValue>> {
    let mut vertices = Vec::with_capacity(initial.len() + 1);
    let mut first = initial.to_vec();
    if limit {
        clip(&mut first, bounds);
    }
    vertices.push(first);
    for _ in 0..initial.len() {
        let mut vertex: Vec<FloatValue> = initial
            .iter()
            .zip(bounds)
            .map(|(p, range)| {
                let sd = match range {
                    Some((min, max)) if max > min && (max - min).is_finite() => {
                        sigma * (max - min) / 2.0
                    }
                    _ => sigma * p.abs().max(1.0),
                };
                let z: FloatValue = rng.sample(StandardNormal);
                p + sd * z
            })
            .collect();
        if limit {
            clip(&mut vertex, bounds);
        }
        vertices.push(vertex);
    }
    vertices
}

#[derive(Debug, Clone)]
pub struct NelderMead {
    bounds: Vec<Option<ParameterRange>>,
    limit: bool,
    sigma: FloatValue,
    no_improve_thr: FloatValue,
    max_stagnations: usize,
    max_iter: usize,
    seed: u64,
}

impl NelderMead {
    pub fn new(config: &CalibrationConfig, bounds: Vec<Option<ParameterRange>>) -> Self {
        Self {
            bounds,
            limit: config.limit,
            sigma: config.sigma,
            no_improve_thr: config.no_improve_thr,
            max_stagnations: config.max_stagnations.max(1),
            max_iter: config.max_iter,
            seed: config.seed,
        }
    }

    fn trial<R: ObjectiveRunner + ?Sized>(&self, runner: &R, mut point: Vec<FloatValue>) -> Vertex {
        if self.limit {
            clip(&mut point, &self.bounds);
        }
        let score = score_or_worst(runner.evaluate(&point));
        (point, score)
    }

    pub fn run<R: ObjectiveRunner + ?Sized>(
        &self,
        runner: &R,
        initial: &[FloatValue],
    ) -> HydroResult<CalibrationResult> {
        let n = runner.n_params();
        if n == 0 {
            return Err(HydroError::Calibration(
                "the procedure has no parameters to calibrate".to_string(),
            ));
        }
        if initial.len() != n || self.bounds.len() != n {
            return Err(HydroError::Calibration(format!(
                "expected {n} parameters, got {} initial values and {} ranges",
                initial.len(),
                self.bounds.len()
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let points = initial_simplex(initial, &self.bounds, self.sigma, self.limit, &mut rng);
        let scores = runner.evaluate_batch(&points);
        let mut simplex: Vec<Vertex> = points
            .into_iter()
            .zip(scores.into_iter().map(score_or_worst))
            .collect();
        if simplex.iter().all(|(_, score)| score.is_infinite()) {
            return Err(HydroError::Calibration(
                "every vertex of the initial simplex failed to evaluate".to_string(),
            ));
        }

        let mut previous_best = FloatValue::INFINITY;
        let mut stagnations = 0;
        let mut iterations = 0;
        let mut history = Vec::new();
        let mut converged = false;

        loop {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            let best = simplex[0].1;
            if iterations >= self.max_iter {
                break;
            }
            iterations += 1;
            if best < previous_best - self.no_improve_thr {
                stagnations = 0;
                previous_best = best;
            } else {
                stagnations += 1;
            }
            history.push(best);
            log::debug!("iteration {iterations}: best score {best}");
            if stagnations >= self.max_stagnations {
                converged = true;
                break;
            }

            let mut centroid = vec![0.0; n];
            for (point, _) in &simplex[..n] {
                for (c, x) in centroid.iter_mut().zip(point) {
                    *c += x / n as FloatValue;
                }
            }
            let worst = simplex[n].clone();
            let along = |coefficient: FloatValue| -> Vec<FloatValue> {
                centroid
                    .iter()
                    .zip(&worst.0)
                    .map(|(c, w)| c + coefficient * (c - w))
                    .collect()
            };

            let reflected = self.trial(runner, along(REFLECTION));
            if simplex[0].1 <= reflected.1 && reflected.1 < simplex[n - 1].1 {
                simplex[n] = reflected;
                continue;
            }
            if reflected.1 < simplex[0].1 {
                let expanded = self.trial(runner, along(EXPANSION));
                simplex[n] = if expanded.1 < reflected.1 {
                    expanded
                } else {
                    reflected
                };
                continue;
            }
            let contracted = self.trial(runner, along(-CONTRACTION));
            if contracted.1 < worst.1 {
                simplex[n] = contracted;
                continue;
            }

            let anchor = simplex[0].0.clone();
            let shrunk: Vec<Vec<FloatValue>> = simplex[1..]
                .iter()
                .map(|(point, _)| {
                    let mut moved: Vec<FloatValue> = anchor
                        .iter()
                        .zip(point)
                        .map(|(a, x)| a + SHRINK * (x - a))
                        .collect();
                    if self.limit {
                        clip(&mut moved, &self.bounds);
                    }
                    moved
                })
                .collect();
            let scores = runner.evaluate_batch(&shrunk);
            for (slot, vertex) in simplex[1..]
                .iter_mut()
                .zip(shrunk.into_iter().zip(scores.into_iter().map(score_or_worst)))
            {
                *slot = vertex;
            }
        }

        let (parameters, score) = simplex.swap_remove(0);
        if converged {
            log::info!("calibration converged after {iterations} iterations, score {score}");
        } else {
            log::warn!(
                "calibration stopped at the iteration limit ({}) without converging, score {score}",
                self.max_iter
            );
        }
        Ok(CalibrationResult {
            parameters,
            score,
            iterations,
            converged,
            history,
        })
    }
}
