//! Simplified Sacramento soil-moisture accounting.
//!
//! Four stores: `x1` upper zone, `x2` lower zone, `x3` and `x4` two linear routing
//! reservoirs in series. Each step is integrated with RK4 (or RK2) over a number of
//! substeps chosen from the forcing and the stability of the zones.
//!
//! Besides `q_sim` and `smc_sim` the model writes `q3`, the discharge of the first
//! routing reservoir, and with [`FloodGuidance`] configured the rainfall depths `fg1` and
//! `fg2` that would bring the current discharge to bankfull in one and two days.

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

/// Stage divisors of the RK4 scheme
const RK_DENOMINATORS: [FloatValue; 3] = [2.0, 2.0, 1.0];

const STATE_NAMES: [&str; 4] = ["x1", "x2", "x3", "x4"];

fn default_rho() -> FloatValue {
    0.5
}

fn default_wp() -> FloatValue {
    0.03
}

fn default_ae() -> FloatValue {
    1.0
}

/// `smc_sim = slope * smc + intercept`, given as `[slope, intercept]` or a table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "SmTransformRepr")]
pub struct SmTransform {
    pub slope: FloatValue,
    pub intercept: FloatValue,
}

impl Default for SmTransform {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl SmTransform {
    pub fn apply(&self, smc: FloatValue) -> FloatValue {
        self.slope * smc + self.intercept
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SmTransformRepr {
    Pair(FloatValue, FloatValue),
    Table {
        slope: FloatValue,
        intercept: FloatValue,
    },
}

impl From<SmTransformRepr> for SmTransform {
    fn from(repr: SmTransformRepr) -> Self {
        match repr {
            SmTransformRepr::Pair(slope, intercept) | SmTransformRepr::Table { slope, intercept } => {
                Self { slope, intercept }
            }
        }
    }
}

/// Curve-number flood guidance.
///
/// `hp1dia` and `hp2dias` are the one- and two-day rainfall depths that raise the discharge
/// by one unit, per km² of basin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloodGuidance {
    #[serde(rename = "CN2", alias = "cn2")]
    pub cn2: FloatValue,
    pub hp1dia: FloatValue,
    pub hp2dias: FloatValue,
    /// Bankfull discharge in m³/s
    #[serde(rename = "Qbanca", alias = "qbanca")]
    pub qbanca: FloatValue,
}

impl FloodGuidance {
    /// Curve number for dry antecedent conditions.
    pub fn cn1(&self) -> FloatValue {
        4.2 * self.cn2 / (10.0 - 0.058 * self.cn2)
    }

    /// Curve number for wet antecedent conditions.
    pub fn cn3(&self) -> FloatValue {
        23.0 * self.cn2 / (10.0 + 0.13 * self.cn2)
    }

    /// One- and two-day guidance, NaN once `q_current` reaches bankfull.
    ///
    /// The curve number is interpolated between CN1 and CN3 by the filling of both zones.
    pub fn compute(
        &self,
        area: FloatValue,
        p: &SacramentoParameters,
        x: &[FloatValue],
        q_current: FloatValue,
    ) -> (FloatValue, FloatValue) {
        if !(q_current < self.qbanca) {
            return (FloatValue::NAN, FloatValue::NAN);
        }
        let km2 = area / 1000.0 / 1000.0;
        let filling = (x[0] + x[1]) / (p.x1_0 + p.x2_0);
        let cn = self.cn1() + (self.cn3() - self.cn1()) * filling;
        let s = 25400.0 / cn - 254.0;
        let depth = |hp: FloatValue| {
            let th = (self.qbanca - q_current) / (hp * km2) * 3.6;
            let b = th + 0.4 * s;
            0.5 * (b + (b * b - 4.0 * (0.04 * s * s - 0.8 * s * th)).sqrt())
        };
        (depth(self.hp1dia), depth(self.hp2dias))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SacramentoSimplified {
    /// Basin area in m²
    pub area: FloatValue,
    /// Soil porosity, the upper bound of the soil moisture content.
    #[serde(default = "default_rho")]
    pub rho: FloatValue,
    #[serde(default = "default_wp")]
    pub wp: FloatValue,
    /// Runoff scale factor
    #[serde(default = "default_ae")]
    pub ae: FloatValue,
    /// Step length used for the discharge units. Defaults to the time index step.
    #[serde(default)]
    pub dt: Option<Interval>,
    /// Upper bound on the substeps of a step. Unbounded when absent.
    #[serde(default)]
    pub max_npasos: Option<usize>,
    /// Skip the forcing-based substep count.
    #[serde(default)]
    pub no_check1: bool,
    /// Skip the stability-based substep count.
    #[serde(default)]
    pub no_check2: bool,
    /// Integrate with RK2 instead of RK4.
    #[serde(default)]
    pub rk2: bool,
    #[serde(default)]
    pub fill_nulls: bool,
    #[serde(default)]
    pub missing_policy: MissingPolicy,
    #[serde(default)]
    pub sm_transform: SmTransform,
    /// Writes `fg1` and `fg2` when set.
    #[serde(default, alias = "par_fg")]
    pub flood_guidance: Option<FloodGuidance>,
}

impl SacramentoSimplified {
    pub fn new(area: FloatValue) -> Self {
        Self {
            area,
            rho: default_rho(),
            wp: default_wp(),
            ae: default_ae(),
            dt: None,
            max_npasos: None,
            no_check1: false,
            no_check2: false,
            rk2: false,
            fill_nulls: false,
            missing_policy: MissingPolicy::default(),
            sm_transform: SmTransform::default(),
            flood_guidance: None,
        }
    }

    fn discharge(&self, p: &SacramentoParameters, store: FloatValue) -> FloatValue {
        self.area * p.alfa * store / 1000.0 / p.dt_seconds * self.ae
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SacramentoParameters {
    pub x1_0: FloatValue,
    pub x2_0: FloatValue,
    pub m1: FloatValue,
    pub c1: FloatValue,
    pub c2: FloatValue,
    pub c3: FloatValue,
    pub mu: FloatValue,
    pub alfa: FloatValue,
    pub m2: FloatValue,
    pub m3: FloatValue,
    pub dt_seconds: FloatValue,
}

impl SacramentoParameters {
    /// Derivatives of the four stores.
    fn derivatives(&self, x: &[FloatValue; 4], p: FloatValue, pet: FloatValue) -> [FloatValue; 4] {
        let upper = x[0] / self.x1_0;
        let lower = x[1] / self.x2_0;
        let sr = p * upper.powf(self.m1);
        let et1 = pet * upper;
        let interflow = self.c1 * x[0];
        let pc = self.c3 * self.x2_0 * (1.0 + self.c2 * (1.0 - lower).powf(self.m2)) * upper;
        let et2 = (pet - et1) * lower.powf(self.m3);
        let gw = self.c3 * x[1];
        let bf = gw / (1.0 + self.mu) + interflow;
        [
            p - sr - pc - et1 - interflow,
            pc - et2 - gw,
            sr + bf - self.alfa * x[2],
            self.alfa * (x[2] - x[3]),
        ]
    }

    fn constrain(&self, x: &mut [FloatValue]) {
        x[0] = x[0].min(self.x1_0).max(0.0);
        x[1] = x[1].min(self.x2_0).max(0.0);
        x[2] = x[2].max(0.0);
        x[3] = x[3].max(0.0);
    }
}

/// Substeps needed to keep the upper zone from going negative.
fn check_upper(x1n: FloatValue, dx1: FloatValue, c: FloatValue) -> usize {
    let mut n = 1;
    if x1n != 0.0 && x1n + dx1 * c < 0.0 {
        n = 2 + (c * dx1.abs() / x1n) as usize;
    }
    n.min(15)
}

/// Substeps needed when a stage leaves the lower zone bounds, and whether it did.
fn check_lower(x2: FloatValue, x2_0: FloatValue, x1: FloatValue) -> (usize, bool) {
    if x2 < 0.0 {
        ((2.0 - x2 / x2_0 * 2.0) as usize, true)
    } else if x2 > x2_0 {
        ((2.0 + (x2 - x2_0) / x2_0 * 2.0) as usize, true)
    } else if x1 < 0.0 {
        ((2.0 - x1 * 10.0) as usize, true)
    } else {
        (1, false)
    }
}

impl SacramentoSimplified {
    /// Stability checks on a trial RK sweep of the two zones.
    fn stability(
        &self,
        p: &SacramentoParameters,
        x: &[FloatValue; 4],
        pma: FloatValue,
        etp: FloatValue,
    ) -> (usize, usize) {
        let (mut n1, mut n2) = (1, 1);
        let (x1n, x2n) = (x[0], x[1]);
        let mut trial = *x;
        let mut stage = 0;
        while stage <= 3 {
            let dx = p.derivatives(&trial, pma, etp);
            if stage < 3 {
                n1 = n1.max(check_upper(x1n, dx[0], 1.0 / RK_DENOMINATORS[stage]));
            }
            let (n, left_bounds) = check_lower(trial[1], p.x2_0, trial[0]);
            n2 = n2.max(n);
            if left_bounds {
                break;
            }
            if stage < 3 {
                trial[0] = (x1n + dx[0] / RK_DENOMINATORS[stage]).min(p.x1_0).max(0.0);
                trial[1] = (x2n + dx[1] / RK_DENOMINATORS[stage]).min(p.x2_0).max(0.0);
            }
            stage += 1;
        }
        (n1, n2)
    }

    fn substeps(
        &self,
        p: &SacramentoParameters,
        x: &[FloatValue; 4],
        pma: FloatValue,
        etp: FloatValue,
    ) -> usize {
        let mut npasos = if self.no_check1 {
            1
        } else {
            ((pma / 2.0) as usize).max(1)
        };
        if !self.no_check2 {
            let (n1, n2) = self.stability(p, x, pma, etp);
            npasos = n2.max(npasos.max(n1.min(24)));
        }
        match self.max_npasos {
            Some(max) => npasos.min(max.max(1)),
            None => npasos,
        }
    }

    fn substep(
        &self,
        p: &SacramentoParameters,
        x: &[FloatValue; 4],
        pma: FloatValue,
        etp: FloatValue,
        npasos: FloatValue,
    ) -> [FloatValue; 4] {
        let mut out = *x;
        if self.rk2 {
            let k1 = p.derivatives(x, pma, etp);
            let mut stage = *x;
            for i in 0..4 {
                stage[i] = x[i] + k1[i] / npasos;
            }
            p.constrain(&mut stage);
            let k2 = p.derivatives(&stage, pma, etp);
            for i in 0..4 {
                out[i] = x[i] + (k1[i] + k2[i]) / 2.0 / npasos;
            }
        } else {
            let mut k = [[0.0; 4]; 4];
            let mut stage = *x;
            for rk in 0..4 {
                k[rk] = p.derivatives(&stage, pma, etp);
                if rk < 3 {
                    for i in 0..4 {
                        stage[i] = x[i] + k[rk][i] / RK_DENOMINATORS[rk] / npasos;
                    }
                    p.constrain(&mut stage);
                }
            }
            for i in 0..4 {
                out[i] = x[i] + (k[0][i] + 2.0 * k[1][i] + 2.0 * k[2][i] + k[3][i]) / 6.0 / npasos;
            }
        }
        p.constrain(&mut out);
        out
    }

    fn outputs(&self, p: &SacramentoParameters, x: &[FloatValue]) -> StepOutput {
        StepOutput {
            q: self.discharge(p, x[3]),
            smc: self
                .sm_transform
                .apply((self.rho - self.wp) * x[0] / p.x1_0 + self.wp),
        }
    }
}

impl BalanceModel for SacramentoSimplified {
    type Parameters = SacramentoParameters;

    fn name(&self) -> &str {
        "SacramentoSimplified"
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("x1_0", 10.0, 500.0),
            ParameterDefinition::new("x2_0", 50.0, 2000.0),
            ParameterDefinition::new("m1", 0.5, 3.0),
            ParameterDefinition::new("c1", 1e-3, 0.5),
            ParameterDefinition::new("c2", 0.0, 300.0),
            ParameterDefinition::new("c3", 1e-4, 0.1),
            ParameterDefinition::new("mu", 0.0, 10.0),
            ParameterDefinition::new("alfa", 1e-3, 1.0),
            ParameterDefinition::new("m2", 0.5, 5.0),
            ParameterDefinition::new("m3", 0.5, 5.0),
        ]
    }

    fn state_names(&self) -> Vec<String> {
        STATE_NAMES.iter().map(|s| s.to_string()).collect()
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
    ) -> HydroResult<SacramentoParameters> {
        let p = SacramentoParameters {
            x1_0: parameters.require("x1_0")?,
            x2_0: parameters.require("x2_0")?,
            m1: parameters.require("m1")?,
            c1: parameters.require("c1")?,
            c2: parameters.require("c2")?,
            c3: parameters.require("c3")?,
            mu: parameters.require("mu")?,
            alfa: parameters.require("alfa")?,
            m2: parameters.require("m2")?,
            m3: parameters.require("m3")?,
            dt_seconds: self
                .dt
                .map(|dt| dt.total_seconds() as FloatValue)
                .unwrap_or_else(|| time_index.step_seconds()),
        };
        for (name, value) in [("x1_0", p.x1_0), ("x2_0", p.x2_0), ("alfa", p.alfa)] {
            if !(value > 0.0) {
                return Err(HydroError::model(
                    BalanceModel::name(self),
                    0,
                    format!("{name} must be positive, got {value}"),
                ));
            }
        }
        if !(p.dt_seconds > 0.0) {
            return Err(HydroError::Configuration(format!(
                "SacramentoSimplified: dt must be positive, got {} s",
                p.dt_seconds
            )));
        }
        Ok(p)
    }

    fn default_state(&self, p: &SacramentoParameters) -> Vec<FloatValue> {
        vec![0.5 * p.x1_0, 0.5 * p.x2_0, 0.0, 0.0]
    }

    fn constrain(&self, p: &SacramentoParameters, state: &mut [FloatValue]) {
        p.constrain(state);
    }

    /// Outputs come from the state at the start of the step.
    fn advance(
        &self,
        p: &SacramentoParameters,
        state: &mut [FloatValue],
        pma: FloatValue,
        etp: FloatValue,
        step: usize,
    ) -> HydroResult<StepOutput> {
        let out = self.outputs(p, state);
        let mut x = [state[0], state[1], state[2], state[3]];
        let npasos = self.substeps(p, &x, pma, etp);
        for _ in 0..npasos {
            x = self.substep(p, &x, pma, etp, npasos as FloatValue);
        }
        state.copy_from_slice(&x);
        check_state(BalanceModel::name(self), state, step)?;
        Ok(out)
    }

    fn observe(
        &self,
        p: &SacramentoParameters,
        state: &[FloatValue],
        _pma: FloatValue,
        _etp: FloatValue,
        _step: usize,
    ) -> HydroResult<StepOutput> {
        Ok(self.outputs(p, state))
    }

    fn extra_output_names(&self) -> Vec<String> {
        let mut names = vec!["q3".to_string()];
        if self.flood_guidance.is_some() {
            names.extend(["fg1".to_string(), "fg2".to_string()]);
        }
        names
    }

    /// `q3`, then `fg1` and `fg2` from the observed discharge, or the simulated one when
    /// the observation is missing.
    fn extra_outputs(
        &self,
        p: &SacramentoParameters,
        state: &[FloatValue],
        q_sim: FloatValue,
        q_obs: FloatValue,
    ) -> Vec<FloatValue> {
        let mut values = vec![self.discharge(p, state[2])];
        if let Some(fg) = &self.flood_guidance {
            let q_current = if q_obs.is_nan() { q_sim } else { q_obs };
            let (fg1, fg2) = fg.compute(self.area, p, state, q_current);
            values.extend([fg1, fg2]);
        }
        values
    }
}

impl TransferFunction for SacramentoSimplified {
    fn name(&self) -> &str {
        "SacramentoSimplified"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        balance_boundaries()
    }

    fn output_names(&self) -> Vec<String> {
        let mut names = balance_outputs();
        names.extend(self.extra_output_names());
        names
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
