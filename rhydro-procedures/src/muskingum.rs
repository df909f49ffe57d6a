//! Muskingum channel routing.
//!
//! `output[t] = C0·input[t] + C1·input[t-1] + C2·output[t-1]` with
//!
//! ```text
//! D  = 2K(1 - X) + dt
//! C0 = (dt - 2KX) / D
//! C1 = (dt + 2KX) / D
//! C2 = (2K(1 - X) - dt) / D
//! ```
//!
//! so that `C0 + C1 + C2 = 1`. `K` is expressed in the same unit as `dt`, which defaults
//! to one time step.

use ndarray::{Array1, Array2};
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::missing::MissingPolicy;
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::{FloatValue, TimeIndex};
use serde::{Deserialize, Serialize};

const STATE_NAMES: [&str; 2] = ["inflow", "outflow"];

fn default_dt() -> FloatValue {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuskingumChannel {
    #[serde(default = "default_dt")]
    pub dt: FloatValue,
    #[serde(default)]
    pub missing_policy: MissingPolicy,
}

impl Default for MuskingumChannel {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            missing_policy: MissingPolicy::default(),
        }
    }
}

/// Routing coefficients `(C0, C1, C2)`.
pub fn coefficients(k: FloatValue, x: FloatValue, dt: FloatValue) -> HydroResult<[FloatValue; 3]> {
    if !(k > 0.0) {
        return Err(HydroError::model(
            "MuskingumChannel",
            0,
            format!("K must be positive, got {k}"),
        ));
    }
    if !(0.0..=0.5).contains(&x) {
        return Err(HydroError::model(
            "MuskingumChannel",
            0,
            format!("X must be within [0, 0.5], got {x}"),
        ));
    }
    let d = 2.0 * k * (1.0 - x) + dt;
    Ok([
        (dt - 2.0 * k * x) / d,
        (dt + 2.0 * k * x) / d,
        (2.0 * k * (1.0 - x) - dt) / d,
    ])
}

impl TransferFunction for MuskingumChannel {
    fn name(&self) -> &str {
        "MuskingumChannel"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        vec![BoundarySpec::required("input")]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("K", 0.1, 20.0),
            ParameterDefinition::new("X", 0.0, 0.5),
        ]
    }

    fn state_names(&self) -> Vec<String> {
        STATE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        let input = boundaries.require("input")?;
        let [c0, c1, c2] = coefficients(
            parameters.require("K")?,
            parameters.require("X")?,
            self.dt,
        )?;

        // Without a given state the channel starts at rest on the first known inflow
        let (mut inflow, mut outflow) = if initial_state.len() == 2 {
            (initial_state.values()[0], initial_state.values()[1])
        } else {
            let first = input.at(0);
            let before = input.at(-1);
            (if before.is_nan() { first } else { before }, first)
        };

        let n = time_index.len();
        let mut output = Array1::from_elem(n, FloatValue::NAN);
        let mut states = Array2::from_elem((n, 2), FloatValue::NAN);
        for t in 0..n {
            let current = input.at(t as isize);
            if current.is_nan() {
                if !self.missing_policy.freezes() {
                    inflow = FloatValue::NAN;
                    outflow = FloatValue::NAN;
                }
            } else {
                if self.missing_policy.freezes() && (inflow.is_nan() || outflow.is_nan()) {
                    inflow = current;
                    outflow = current;
                }
                let routed = c0 * current + c1 * inflow + c2 * outflow;
                if !routed.is_finite() && !outflow.is_nan() {
                    return Err(HydroError::model(
                        self.name(),
                        t,
                        format!("non-finite outflow {routed}"),
                    ));
                }
                output[t] = routed;
                inflow = current;
                outflow = routed;
            }
            states[[t, 0]] = inflow;
            states[[t, 1]] = outflow;
        }

        Ok(
            FunctionOutput::new(StateVector::named(&STATE_NAMES, vec![inflow, outflow]))
                .with_output("output", output)
                .with_states(states),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_index, series};
    use is_close::is_close;
    use rhydro_core::parameters::ValueInput;

    fn route(
        channel: &MuskingumChannel,
        values: &[f64],
        k: f64,
        x: f64,
        state: StateVector,
    ) -> FunctionOutput {
        let input = series(1, values);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input", &input);
        let parameters = ParameterVector::from_input(
            &channel.parameter_definitions(),
            &ValueInput::List(vec![k, x]),
        )
        .unwrap();
        channel
            .run(&boundaries, &parameters, &state, &daily_index(values.len()))
            .unwrap()
    }

    #[test]
    fn coefficients_sum_to_one() {
        let [c0, c1, c2] = coefficients(2.0, 0.2, 1.0).unwrap();
        assert!(is_close!(c0 + c1 + c2, 1.0));
        assert!(is_close!(c2, 2.2 / 4.2));
        assert!(coefficients(0.0, 0.2, 1.0).is_err());
        assert!(coefficients(2.0, 0.6, 1.0).is_err());
    }

    #[test]
    fn converges_to_constant_inflow() {
        let channel = MuskingumChannel::default();
        let result = route(
            &channel,
            &[10.0; 50],
            2.0,
            0.2,
            StateVector::named(&STATE_NAMES, vec![0.0, 0.0]),
        );
        let output = &result.outputs["output"];
        assert!(output[0] < 10.0);
        assert!((output[49] - 10.0).abs() < 1e-6);
        assert!((result.final_state.get("outflow").unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn default_state_starts_at_rest() {
        let result = route(
            &MuskingumChannel::default(),
            &[5.0, 5.0, 5.0],
            2.0,
            0.2,
            StateVector::empty(),
        );
        for v in result.outputs["output"].iter() {
            assert!(is_close!(*v, 5.0));
        }
    }

    #[test]
    fn freeze_resumes_exact_recurrence() {
        let channel = MuskingumChannel::default();
        let state = StateVector::named(&STATE_NAMES, vec![0.0, 0.0]);
        let gappy = route(
            &channel,
            &[4.0, 8.0, f64::NAN, 6.0, 2.0],
            2.0,
            0.2,
            state.clone(),
        );
        let compact = route(&channel, &[4.0, 8.0, 6.0, 2.0], 2.0, 0.2, state);

        let gappy = &gappy.outputs["output"];
        let compact = &compact.outputs["output"];
        assert!(gappy[2].is_nan());
        assert_eq!(gappy[1], compact[1]);
        assert_eq!(gappy[3], compact[2]);
        assert_eq!(gappy[4], compact[3]);
    }

    #[test]
    fn propagate_turns_every_later_output_missing() {
        let channel = MuskingumChannel {
            missing_policy: MissingPolicy::Propagate,
            ..Default::default()
        };
        let result = route(
            &channel,
            &[4.0, f64::NAN, 6.0, 2.0],
            2.0,
            0.2,
            StateVector::empty(),
        );
        let output = &result.outputs["output"];
        assert!(!output[0].is_nan());
        assert!(output.iter().skip(1).all(|v| v.is_nan()));
        assert!(result.final_state.values()[1].is_nan());
    }
}
