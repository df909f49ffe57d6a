//! GRP-type rainfall-runoff balance: a production store feeding a routing store.
//!
//! Per step, with `P = pma` and `E = etp` in mm:
//!
//! ```text
//! Pn = max(P - E, 0)                          En = max(E - P, 0)
//! Ps = X1 (1 - s²) tanh(Pn/X0) / (1 + s tanh(Pn/X0))      s = Sk / X1
//! Es = Sk (2 - s) tanh(En/X0) / (1 + (1 - s) tanh(En/X0))
//! Perc = Sk (1 - (1 + (4/9 Sk/X1)^4)^(-1/4))
//! Pr = Perc + Pn - Ps
//! Rk += rho Pr, overflow above X2, Qr = min(Rk, Rk^n / X3^(n-1))
//! Q  = (Qr + (1 - rho) Pr + overflow) · area / 1000 / dt
//! ```

use crate::balance::{
    balance_boundaries, balance_outputs, check_state, run_balance, BalanceModel, StepOutput,
};
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::missing::MissingPolicy;
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::{FloatValue, Interval, TimeIndex};
use serde::{Deserialize, Serialize};

fn default_wp() -> FloatValue {
    0.03
}

fn default_rho() -> FloatValue {
    0.5
}

fn default_routing_exponent() -> FloatValue {
    4.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grp {
    /// Basin area in m²
    pub area: FloatValue,
    /// Wetting point, as a fraction of X1. Evaporation stops below it.
    #[serde(default = "default_wp")]
    pub wp: FloatValue,
    /// Fraction of effective rainfall sent through the routing store.
    #[serde(default = "default_rho")]
    pub rho: FloatValue,
    #[serde(default = "default_routing_exponent")]
    pub routing_exponent: FloatValue,
    /// Step length used for the discharge units. Defaults to the time index step.
    #[serde(default)]
    pub dt: Option<Interval>,
    #[serde(default)]
    pub fill_nulls: bool,
    #[serde(default)]
    pub missing_policy: MissingPolicy,
}

impl Grp {
    pub fn new(area: FloatValue) -> Self {
        Self {
            area,
            wp: default_wp(),
            rho: default_rho(),
            routing_exponent: default_routing_exponent(),
            dt: None,
            fill_nulls: false,
            missing_policy: MissingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GrpParameters {
    pub x0: FloatValue,
    pub x1: FloatValue,
    pub x2: FloatValue,
    pub x3: FloatValue,
    pub dt_seconds: FloatValue,
}

impl BalanceModel for Grp {
    type Parameters = GrpParameters;

    fn name(&self) -> &str {
        "GRP"
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("X0", 1.0, 500.0),
            ParameterDefinition::new("X1", 10.0, 2000.0),
            ParameterDefinition::new("X2", 1.0, 500.0),
            ParameterDefinition::new("X3", 0.5, 100.0),
        ]
    }

    fn state_names(&self) -> Vec<String> {
        vec!["Sk".to_string(), "Rk".to_string()]
    }

    fn fill_nulls(&self) -> bool {
        self.fill_nulls
    }

    fn missing_policy(&self) -> MissingPolicy {
        self.missing_policy
    }

    fn prepare(
        &self,
        parameters: &ParameterVector,
        time_index: &TimeIndex,
    ) -> HydroResult<GrpParameters> {
        let prepared = GrpParameters {
            x0: parameters.require("X0")?,
            x1: parameters.require("X1")?,
            x2: parameters.require("X2")?,
            x3: parameters.require("X3")?,
            dt_seconds: self
                .dt
                .map(|dt| dt.total_seconds() as FloatValue)
                .unwrap_or_else(|| time_index.step_seconds()),
        };
        for (name, value) in [
            ("X0", prepared.x0),
            ("X1", prepared.x1),
            ("X3", prepared.x3),
        ] {
            if !(value > 0.0) {
                return Err(HydroError::model(
                    BalanceModel::name(self),
                    0,
                    format!("{name} must be positive, got {value}"),
                ));
            }
        }
        if !(prepared.dt_seconds > 0.0) {
            return Err(HydroError::Configuration(format!(
                "GRP: dt must be positive, got {} s",
                prepared.dt_seconds
            )));
        }
        Ok(prepared)
    }

    fn default_state(&self, parameters: &GrpParameters) -> Vec<FloatValue> {
        vec![0.5 * parameters.x1, 0.0]
    }

    fn constrain(&self, parameters: &GrpParameters, state: &mut [FloatValue]) {
        state[0] = state[0].clamp(0.0, parameters.x1);
        state[1] = state[1].max(0.0);
    }

    fn advance(
        &self,
        p: &GrpParameters,
        state: &mut [FloatValue],
        pma: FloatValue,
        etp: FloatValue,
        step: usize,
    ) -> HydroResult<StepOutput> {
        let (mut sk, mut rk) = (state[0], state[1]);
        let pn = (pma - etp).max(0.0);
        let en = (etp - pma).max(0.0);

        let s = sk / p.x1;
        let ps = if pn > 0.0 {
            let tw = (pn / p.x0).tanh();
            (p.x1 * (1.0 - s * s) * tw / (1.0 + s * tw))
                .min(pn)
                .min(p.x1 - sk)
                .max(0.0)
        } else {
            0.0
        };
        let es = if en > 0.0 {
            let te = (en / p.x0).tanh();
            (sk * (2.0 - s) * te / (1.0 + (1.0 - s) * te))
                .min(en)
                .min((sk - self.wp * p.x1).max(0.0))
                .max(0.0)
        } else {
            0.0
        };
        sk = sk + ps - es;

        let perc = sk * (1.0 - (1.0 + (4.0 / 9.0 * sk / p.x1).powi(4)).powf(-0.25));
        sk -= perc;

        let pr = perc + pn - ps;
        rk += self.rho * pr;
        let direct = (1.0 - self.rho) * pr;
        let overflow = (rk - p.x2.max(0.0)).max(0.0);
        rk -= overflow;
        let n = self.routing_exponent;
        let qr = rk.min(rk.powf(n) / p.x3.powf(n - 1.0));
        rk -= qr;

        state[0] = sk;
        state[1] = rk;
        check_state(BalanceModel::name(self), state, step)?;
        Ok(StepOutput {
            q: (qr + direct + overflow) * self.area / 1000.0 / p.dt_seconds,
            smc: sk / p.x1,
        })
    }
}

impl TransferFunction for Grp {
    fn name(&self) -> &str {
        "GRP"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        balance_boundaries()
    }

    fn output_names(&self) -> Vec<String> {
        balance_outputs()
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        BalanceModel::parameter_definitions(self)
    }

    fn state_names(&self) -> Vec<String> {
        BalanceModel::state_names(self)
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        run_balance(self, boundaries, parameters, initial_state, time_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_index, series};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rhydro_core::parameters::ValueInput;

    fn run(
        grp: &Grp,
        pma: &[f64],
        etp: &[f64],
        parameters: [f64; 4],
        state: StateVector,
    ) -> HydroResult<FunctionOutput> {
        let pma = series(1, pma);
        let etp = series(2, etp);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("pma", &pma);
        boundaries.insert("etp", &etp);
        let parameters = ParameterVector::from_input(
            &BalanceModel::parameter_definitions(grp),
            &ValueInput::List(parameters.to_vec()),
        )
        .unwrap();
        grp.run(&boundaries, &parameters, &state, &daily_index(pma.len()))
    }

    #[test]
    fn stores_stay_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..50 {
            let n = 60;
            let pma: Vec<f64> = (0..n)
                .map(|_| {
                    if rng.gen_bool(0.3) {
                        rng.gen_range(0.0..80.0)
                    } else {
                        0.0
                    }
                })
                .collect();
            let etp: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..8.0)).collect();
            let parameters = [
                rng.gen_range(1.0..500.0),
                rng.gen_range(10.0..2000.0),
                rng.gen_range(1.0..500.0),
                rng.gen_range(0.5..100.0),
            ];
            let x1 = parameters[1];
            let initial = StateVector::named(
                &["Sk", "Rk"],
                vec![rng.gen_range(0.0..x1), rng.gen_range(0.0..100.0)],
            );

            let result = run(&Grp::new(1e7), &pma, &etp, parameters, initial).unwrap();
            let states = result.states.unwrap();
            for row in states.rows() {
                assert!(row[0] >= 0.0 && row[0] <= x1 + 1e-9, "Sk {} outside [0, {x1}]", row[0]);
                assert!(row[1] >= 0.0, "Rk {} negative", row[1]);
            }
            for q in result.outputs["q_sim"].iter() {
                assert!(*q >= 0.0);
            }
        }
    }

    #[test]
    fn dry_basin_drains() {
        let result = run(
            &Grp::new(1e6),
            &[0.0; 30],
            &[0.0; 30],
            [50.0, 300.0, 100.0, 5.0],
            StateVector::named(&["Sk", "Rk"], vec![150.0, 50.0]),
        )
        .unwrap();
        let q = &result.outputs["q_sim"];
        assert!(q[0] > q[29]);
        assert!(result.final_state.get("Rk").unwrap() < 50.0);
        assert!(result.final_state.get("Sk").unwrap() < 150.0);
    }

    #[test]
    fn rain_wets_the_soil() {
        let result = run(
            &Grp::new(1e6),
            &[40.0; 5],
            &[1.0; 5],
            [50.0, 300.0, 100.0, 5.0],
            StateVector::empty(),
        )
        .unwrap();
        let smc = &result.outputs["smc_sim"];
        assert!(smc[4] > 0.5);
        assert!(smc.windows(2).into_iter().all(|w| w[1] >= w[0]));
    }

    #[test]
    fn invalid_parameters() {
        let result = run(
            &Grp::new(1e6),
            &[1.0; 3],
            &[1.0; 3],
            [0.0, 300.0, 100.0, 5.0],
            StateVector::empty(),
        );
        assert!(matches!(
            result,
            Err(HydroError::ModelEvaluation { step: 0, .. })
        ));
    }

    #[test]
    fn missing_forcing_freezes_or_fills() {
        let pma = [10.0, f64::NAN, 10.0];
        let frozen = run(
            &Grp::new(1e6),
            &pma,
            &[1.0; 3],
            [50.0, 300.0, 100.0, 5.0],
            StateVector::empty(),
        )
        .unwrap();
        let states = frozen.states.unwrap();
        assert!(frozen.outputs["q_sim"][1].is_nan());
        assert_eq!(states[[0, 0]], states[[1, 0]]);
        assert!(!frozen.outputs["q_sim"][2].is_nan());

        let mut filling = Grp::new(1e6);
        filling.fill_nulls = true;
        let filled = run(
            &filling,
            &pma,
            &[1.0; 3],
            [50.0, 300.0, 100.0, 5.0],
            StateVector::empty(),
        )
        .unwrap();
        assert!(!filled.outputs["q_sim"][1].is_nan());
    }
}
