//! Linear channel routing by unit-hydrograph convolution.
//!
//! `output[t] = Σ_k u[k] · input[t - k]`. Samples before the window start come from the
//! boundary's lookback, then from the state (the last inputs of a previous run), then zero.
//!
//! [`LinearChannel`] derives the kernel from a Nash cascade of `n` linear reservoirs with
//! storage constant `k`. [`UhLinearChannel`] takes the ordinates directly.

use ndarray::Array1;
use rhydro_core::boundary::{BoundarySeries, BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::missing::MissingPolicy;
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector, ValueInput};
use rhydro_core::timeseries::{FloatValue, TimeIndex};
use serde::{Deserialize, Serialize};

fn default_max_ordinates() -> usize {
    100
}

fn default_cumulative() -> FloatValue {
    0.9999
}

/// Subintervals used to integrate the impulse response over each step.
const INTEGRATION_POINTS: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearChannel {
    #[serde(default = "default_max_ordinates")]
    pub max_ordinates: usize,
    /// The kernel is cut once it holds this fraction of the response.
    #[serde(default = "default_cumulative")]
    pub cumulative: FloatValue,
    #[serde(default)]
    pub missing_policy: MissingPolicy,
}

impl Default for LinearChannel {
    fn default() -> Self {
        Self {
            max_ordinates: default_max_ordinates(),
            cumulative: default_cumulative(),
            missing_policy: MissingPolicy::default(),
        }
    }
}

/// Lanczos approximation of `ln Γ(x)` for `x > 0`.
fn ln_gamma(x: FloatValue) -> FloatValue {
    const G: FloatValue = 7.0;
    const COEFFICIENTS: [FloatValue; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = COEFFICIENTS[0];
    let t = x + G + 0.5;
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        a += c / (x + i as FloatValue);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Unit hydrograph of a Nash cascade, one ordinate per step, normalized to sum 1.
pub fn nash_kernel(
    k: FloatValue,
    n: FloatValue,
    max_ordinates: usize,
    cumulative: FloatValue,
) -> HydroResult<Vec<FloatValue>> {
    if !(k > 0.0) || !(n > 0.0) {
        return Err(HydroError::model(
            "LinearChannel",
            0,
            format!("k and n must be positive, got k={k}, n={n}"),
        ));
    }
    // Gamma density t^(n-1) e^(-t/k) / (k^n Γ(n))
    let ln_norm = n * k.ln() + ln_gamma(n);
    let density = |t: FloatValue| ((n - 1.0) * t.ln() - t / k - ln_norm).exp();

    let h = 1.0 / INTEGRATION_POINTS as FloatValue;
    let mut kernel = Vec::new();
    let mut total = 0.0;
    for step in 0..max_ordinates.max(1) {
        // Midpoint rule avoids the singularity at t = 0 when n < 1
        let ordinate: FloatValue = (0..INTEGRATION_POINTS)
            .map(|j| density(step as FloatValue + (j as FloatValue + 0.5) * h) * h)
            .sum();
        kernel.push(ordinate);
        total += ordinate;
        if total >= cumulative {
            break;
        }
    }
    normalize(kernel)
}

fn normalize(kernel: Vec<FloatValue>) -> HydroResult<Vec<FloatValue>> {
    let total: FloatValue = kernel.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(HydroError::model(
            "LinearChannel",
            0,
            format!("unit hydrograph has a non-positive volume ({total})"),
        ));
    }
    Ok(kernel.into_iter().map(|u| u / total).collect())
}

/// Convolve `input` with `kernel`.
///
/// Returns the output and the last `kernel.len() - 1` effective inputs, oldest first.
pub fn convolve(
    input: &BoundarySeries,
    kernel: &[FloatValue],
    initial_state: &[FloatValue],
    policy: MissingPolicy,
    len: usize,
) -> (Array1<FloatValue>, Vec<FloatValue>) {
    let memory = kernel.len().saturating_sub(1);

    // Samples before the window: lookback, then state, then zero
    let history: Vec<FloatValue> = (1..=memory)
        .rev()
        .map(|back| {
            let i = -(back as isize);
            if back <= input.lookback_len() {
                input.at(i)
            } else {
                initial_state
                    .len()
                    .checked_sub(back)
                    .map(|j| initial_state[j])
                    .unwrap_or(0.0)
            }
        })
        .collect();

    // Inputs used by the convolution, missing values substituted per policy
    let mut effective = Vec::with_capacity(memory + len);
    let mut last_valid = 0.0;
    for value in history {
        if value.is_nan() && policy.freezes() {
            effective.push(last_valid);
        } else {
            if !value.is_nan() {
                last_valid = value;
            }
            effective.push(value);
        }
    }
    for t in 0..len {
        let value = input.at(t as isize);
        if value.is_nan() {
            effective.push(if policy.freezes() {
                last_valid
            } else {
                FloatValue::NAN
            });
        } else {
            last_valid = value;
            effective.push(value);
        }
    }

    let output = Array1::from_iter((0..len).map(|t| {
        if input.at(t as isize).is_nan() {
            return FloatValue::NAN;
        }
        let current = t + memory;
        kernel
            .iter()
            .enumerate()
            .map(|(k, u)| u * effective[current - k])
            .sum()
    }));
    let final_state = effective[effective.len() - memory..].to_vec();
    (output, final_state)
}

fn run_convolution(
    name: &str,
    boundaries: &BoundarySet,
    kernel: &[FloatValue],
    initial_state: &StateVector,
    policy: MissingPolicy,
    time_index: &TimeIndex,
) -> HydroResult<FunctionOutput> {
    let input = boundaries.require("input")?;
    let (output, final_state) =
        convolve(input, kernel, initial_state.values(), policy, time_index.len());
    log::debug!("{name}: convolved {} steps with {} ordinates", output.len(), kernel.len());
    Ok(FunctionOutput::new(StateVector::from_values(final_state)).with_output("output", output))
}

impl TransferFunction for LinearChannel {
    fn name(&self) -> &str {
        "LinearChannel"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        vec![BoundarySpec::required("input")]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("k", 0.1, 50.0),
            ParameterDefinition::new("n", 0.5, 10.0),
        ]
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        let kernel = nash_kernel(
            parameters.require("k")?,
            parameters.require("n")?,
            self.max_ordinates,
            self.cumulative,
        )?;
        run_convolution(
            self.name(),
            boundaries,
            &kernel,
            initial_state,
            self.missing_policy,
            time_index,
        )
    }
}

/// Convolution with user-supplied ordinates `u_0..u_N`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UhLinearChannel {
    /// Kernel ordinates. Also the default parameter values.
    #[serde(default)]
    pub u: Vec<FloatValue>,
    #[serde(default)]
    pub missing_policy: MissingPolicy,
}

impl UhLinearChannel {
    pub fn new(u: Vec<FloatValue>) -> Self {
        Self {
            u,
            missing_policy: MissingPolicy::default(),
        }
    }

    pub(crate) fn infer_ordinates(&mut self, parameters: &ValueInput) {
        if self.u.is_empty() {
            if let ValueInput::List(values) = parameters {
                self.u = values.clone();
            }
        }
    }
}

impl TransferFunction for UhLinearChannel {
    fn name(&self) -> &str {
        "UHLinearChannel"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        vec![BoundarySpec::required("input")]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        (0..self.u.len())
            .map(|i| ParameterDefinition::new(format!("u_{i}"), 0.0, 1.0))
            .collect()
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        let kernel = if parameters.is_empty() {
            self.u.clone()
        } else {
            parameters.values()
        };
        if kernel.is_empty() || kernel.iter().any(|u| !u.is_finite()) {
            return Err(HydroError::model(
                self.name(),
                0,
                "unit hydrograph ordinates must be finite and non-empty",
            ));
        }
        run_convolution(
            self.name(),
            boundaries,
            &kernel,
            initial_state,
            self.missing_policy,
            time_index,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_index, series};
    use is_close::is_close;
    use rhydro_core::series::SeriesBuffer;

    fn run_uh(
        channel: &UhLinearChannel,
        buffer: &SeriesBuffer,
        state: &StateVector,
    ) -> FunctionOutput {
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input", buffer);
        let parameters = ParameterVector::from_input(
            &channel.parameter_definitions(),
            &ValueInput::List(channel.u.clone()),
        )
        .unwrap();
        channel
            .run(&boundaries, &parameters, state, &daily_index(buffer.len()))
            .unwrap()
    }

    #[test]
    fn ln_gamma_matches_factorials() {
        assert!(is_close!(ln_gamma(1.0), 0.0, abs_tol = 1e-12));
        assert!(is_close!(ln_gamma(5.0), 24f64.ln()));
        assert!(is_close!(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln()));
    }

    #[test]
    fn nash_kernel_is_normalized() {
        let kernel = nash_kernel(2.0, 3.0, 100, 0.9999).unwrap();
        assert!(is_close!(kernel.iter().sum::<f64>(), 1.0));
        assert!(kernel.len() < 100);
        // Peak of the gamma density is at (n - 1) k = 4 steps
        let peak = kernel
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((3..=4).contains(&peak));

        // A single reservoir peaks in the first step
        let kernel = nash_kernel(1.0, 1.0, 100, 0.9999).unwrap();
        assert!(kernel[0] > kernel[1]);
        assert!(nash_kernel(-1.0, 1.0, 100, 0.9999).is_err());
    }

    #[test]
    fn convolution_conserves_volume() {
        let u = vec![0.2, 0.5, 0.3];
        let channel = UhLinearChannel::new(u.clone());
        let input = [0.0, 5.0, 5.0, 0.0, 0.0, 0.0, 0.0];
        let result = run_uh(&channel, &series(1, &input), &StateVector::empty());
        let output = &result.outputs["output"];
        assert!(is_close!(
            output.sum(),
            u.iter().sum::<f64>() * input.iter().sum::<f64>()
        ));
        assert!(is_close!(output[1], 1.0));
        assert!(is_close!(output[2], 3.5));
    }

    #[test]
    fn history_from_lookback_then_state() {
        let channel = UhLinearChannel::new(vec![0.5, 0.25, 0.25]);
        let buffer = series(1, &[4.0, 4.0]).with_lookback(vec![8.0]);
        let state = StateVector::from_values(vec![100.0, 0.0]);
        let result = run_uh(&channel, &buffer, &state);
        // t=0: 0.5*4 + 0.25*8 (lookback) + 0.25*100 (state)
        assert!(is_close!(result.outputs["output"][0], 29.0));
        assert_eq!(result.final_state.values(), &[4.0, 4.0]);
    }

    #[test]
    fn missing_input_policies() {
        let u = vec![0.5, 0.5];
        let buffer = series(1, &[2.0, f64::NAN, 4.0, 4.0]);

        let frozen = run_uh(&UhLinearChannel::new(u.clone()), &buffer, &StateVector::empty());
        let frozen = &frozen.outputs["output"];
        assert!(frozen[1].is_nan());
        // The missing step is replaced by the last valid input (2.0)
        assert!(is_close!(frozen[2], 3.0));

        let propagating = UhLinearChannel {
            u,
            missing_policy: MissingPolicy::Propagate,
        };
        let propagated = run_uh(&propagating, &buffer, &StateVector::empty());
        let propagated = &propagated.outputs["output"];
        assert!(propagated[2].is_nan());
        assert!(is_close!(propagated[3], 4.0));
    }

    #[test]
    fn nash_channel_routes_a_pulse() {
        let channel = LinearChannel::default();
        let mut values = vec![0.0; 60];
        values[0] = 10.0;
        let buffer = series(1, &values);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input", &buffer);
        let parameters = ParameterVector::from_input(
            &channel.parameter_definitions(),
            &ValueInput::List(vec![2.0, 2.0]),
        )
        .unwrap();
        let result = channel
            .run(&boundaries, &parameters, &StateVector::empty(), &daily_index(60))
            .unwrap();
        assert!(is_close!(result.outputs["output"].sum(), 10.0));
        assert!(result.final_state.len() > 0);
    }
}
