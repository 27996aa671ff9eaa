//! Seeded synthetic datasets shared by the integration tests.

#![allow(dead_code)]

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tmle::data::{
    CategoricalColumn, ConfounderTable, Dataset, OutcomeColumn, OutcomeTable, TreatmentTable,
    reformat,
};
use tmle::parameter::{
    AverageTreatmentEffect, CounterfactualMean, InteractionEffect, Parameter, TreatmentContrast,
    TreatmentLevel,
};

pub fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn contrast(name: &str, case: &str, control: &str) -> TreatmentContrast {
    TreatmentContrast {
        name: name.into(),
        case: case.into(),
        control: control.into(),
    }
}

pub fn ate(target: &str, treatment: Vec<TreatmentContrast>, confounders: &[&str]) -> Parameter {
    Parameter::ATE(AverageTreatmentEffect {
        target: target.into(),
        treatment,
        confounders: names(confounders),
    })
}

pub fn iate(target: &str, treatment: Vec<TreatmentContrast>, confounders: &[&str]) -> Parameter {
    Parameter::IATE(InteractionEffect {
        target: target.into(),
        treatment,
        confounders: names(confounders),
    })
}

pub fn cm(target: &str, treatment: &[(&str, &str)], confounders: &[&str]) -> Parameter {
    Parameter::CM(CounterfactualMean {
        target: target.into(),
        treatment: treatment
            .iter()
            .map(|(name, level)| TreatmentLevel {
                name: name.to_string(),
                level: level.to_string(),
            })
            .collect(),
        confounders: names(confounders),
    })
}

/// `W ~ U(0, 1)`, binary `T` with `P(T) = 0.3 + 0.4 W`,
/// `y = 3 W + T + T W + N(0, 1)`. Treatment levels are `"false"` / `"true"`.
pub fn linear_dataset(seed: u64, n: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let w: Array1<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
    let t: Vec<bool> = w.iter().map(|&wi| rng.gen_bool(0.3 + 0.4 * wi)).collect();
    let y: Array1<f64> = w
        .iter()
        .zip(&t)
        .map(|(&wi, &ti)| {
            let ti = if ti { 1.0 } else { 0.0 };
            let noise: f64 = rng.sample(StandardNormal);
            3.0 * wi + ti + ti * wi + noise
        })
        .collect();

    reformat(
        TreatmentTable::new(
            names(&["T"]),
            vec![CategoricalColumn::from_complete(
                t.iter().map(|&ti| if ti { "true" } else { "false" }),
            )],
        )
        .unwrap(),
        ConfounderTable::new(names(&["W"]), w.insert_axis(ndarray::Axis(1))).unwrap(),
        y,
    )
    .unwrap()
}

/// `k` independent fair binary treatments `T1..Tk` (levels `"0"` / `"1"`),
/// confounders `W1, W2 ~ N(0, 1)` and
/// `y = 1 + W1 - 0.5 W2 + sum(T_j) + interaction * prod(T_j) + N(0, 1)`.
/// The true k-way interaction effect is `interaction`.
pub fn interaction_dataset(seed: u64, n: usize, k: usize, interaction: f64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let w = Array2::from_shape_fn((n, 2), |_| rng.sample::<f64, _>(StandardNormal));
    let t: Vec<Vec<bool>> = (0..k)
        .map(|_| (0..n).map(|_| rng.gen_bool(0.5)).collect())
        .collect();
    let y: Array1<f64> = (0..n)
        .map(|i| {
            let active: Vec<f64> = t.iter().map(|tj| if tj[i] { 1.0 } else { 0.0 }).collect();
            let noise: f64 = rng.sample(StandardNormal);
            1.0 + w[(i, 0)] - 0.5 * w[(i, 1)]
                + active.iter().sum::<f64>()
                + interaction * active.iter().product::<f64>()
                + noise
        })
        .collect();

    let treatment_names: Vec<String> = (1..=k).map(|j| format!("T{j}")).collect();
    let columns = t
        .iter()
        .map(|tj| CategoricalColumn::from_complete(tj.iter().map(|&b| if b { "1" } else { "0" })))
        .collect();
    reformat(
        TreatmentTable::new(treatment_names, columns).unwrap(),
        ConfounderTable::new(names(&["W1", "W2"]), w).unwrap(),
        y,
    )
    .unwrap()
}

/// Binary treatment `T` (`"a"` / `"b"`) with `P(T = b) = sigmoid(0.5 W1)`,
/// a binary outcome `yb` (`"0"` / `"1"`) with `P(yb = 1) = sigmoid(-0.5 + T + W1)`
/// and a continuous outcome `yc = 2 T + W1 + W2 + N(0, 1)`.
///
/// `missing_continuous` and `missing_binary` rows (the first ones, and the
/// last ones respectively) are set missing.
pub fn mixed_outcome_dataset(
    seed: u64,
    n: usize,
    missing_continuous: usize,
    missing_binary: usize,
) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let w = Array2::from_shape_fn((n, 2), |_| rng.sample::<f64, _>(StandardNormal));
    let t: Vec<bool> = (0..n)
        .map(|i| rng.gen_bool(sigmoid(0.5 * w[(i, 0)])))
        .collect();
    let mut yc = Array1::zeros(n);
    let mut yb = Vec::with_capacity(n);
    for i in 0..n {
        let ti = if t[i] { 1.0 } else { 0.0 };
        let noise: f64 = rng.sample(StandardNormal);
        yc[i] = 2.0 * ti + w[(i, 0)] + w[(i, 1)] + noise;
        let success = rng.gen_bool(sigmoid(-0.5 + ti + w[(i, 0)]));
        yb.push(Some(if success { "1" } else { "0" }));
    }
    for i in 0..missing_continuous {
        yc[i] = f64::NAN;
    }
    for value in yb.iter_mut().rev().take(missing_binary) {
        *value = None;
    }

    reformat(
        TreatmentTable::new(
            names(&["T"]),
            vec![CategoricalColumn::from_complete(
                t.iter().map(|&b| if b { "b" } else { "a" }),
            )],
        )
        .unwrap(),
        ConfounderTable::new(names(&["W1", "W2"]), w).unwrap(),
        OutcomeTable::new(
            names(&["yc", "yb"]),
            vec![
                OutcomeColumn::Continuous(yc),
                OutcomeColumn::Categorical(CategoricalColumn::from_values(yb)),
            ],
        )
        .unwrap(),
    )
    .unwrap()
}

/// Fully balanced design over four binary treatments `T1..T4` (levels
/// `"0"` / `"1"`): every one of the 16 joint assignments appears
/// `4 * replicates` times, each with confounders
/// `(W1, W2)` in `{-1, 1} x {-1, 1}`. The outcome is
/// `y = 1 + W1 - 0.5 W2 + sum(T_j) + interaction * s(T) + noise * W1 * W2`
/// with `s(T) = prod(2 T_j - 1)`.
///
/// Both `s(T)` and `W1 * W2` are orthogonal to the intercept, the treatment
/// indicators and the confounders, and the treatment mechanism is uniform,
/// so with `n = 64 * replicates` the targeted estimate of the 4-way
/// interaction is `16 * interaction`, its influence curve is
/// `16 * noise * s(T) * W1 * W2` and its standard error is
/// `16 * noise / sqrt(n - 1)`.
pub fn balanced_interaction_dataset(replicates: usize, interaction: f64, noise: f64) -> Dataset {
    let corners = [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)];
    let mut bits: Vec<[bool; 4]> = Vec::new();
    let mut w = Vec::new();
    for _ in 0..replicates {
        for cell in 0..16usize {
            for &(w1, w2) in &corners {
                bits.push(std::array::from_fn(|j| (cell >> j) & 1 == 1));
                w.push([w1, w2]);
            }
        }
    }
    let n = bits.len();
    let y: Array1<f64> = (0..n)
        .map(|i| {
            let [w1, w2] = w[i];
            let active = bits[i].iter().filter(|&&b| b).count() as f64;
            let sign: f64 = bits[i].iter().map(|&b| if b { 1.0 } else { -1.0 }).product();
            1.0 + w1 - 0.5 * w2 + active + interaction * sign + noise * w1 * w2
        })
        .collect();

    let columns = (0..4)
        .map(|j| {
            CategoricalColumn::from_complete(bits.iter().map(|b| if b[j] { "1" } else { "0" }))
        })
        .collect();
    reformat(
        TreatmentTable::new(names(&["T1", "T2", "T3", "T4"]), columns).unwrap(),
        ConfounderTable::new(
            names(&["W1", "W2"]),
            Array2::from_shape_fn((n, 2), |(i, j)| w[i][j]),
        )
        .unwrap(),
        y,
    )
    .unwrap()
}
