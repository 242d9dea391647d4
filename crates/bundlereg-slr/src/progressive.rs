use bundlereg_streamline::Bundle;

use crate::map::RegistrationOutput;
use crate::metric::MetricKind;
use crate::registration::{InitialParams, SlrConfig, StreamlineLinearRegistration};
use crate::transform::TransformKind;
use crate::RegistrationError;

/// One stage of the progressive registration.
#[derive(Debug, Clone, Copy)]
pub struct ProgressiveStage {
    /// The transform family optimized at this stage.
    pub kind: TransformKind,
    /// Builds the initial parameters of the stage from the optimum of the previous stage.
    pub seed: fn(&[f64]) -> Vec<f64>,
}

fn padded(x: &[f64], len: usize, fill: f64) -> Vec<f64> {
    let mut out: Vec<f64> = x.iter().copied().take(len).collect();
    out.resize(len, fill);
    out
}

fn seed_translation(_: &[f64]) -> Vec<f64> {
    TransformKind::Translation.identity_params()
}

fn seed_rigid(x: &[f64]) -> Vec<f64> {
    padded(&x[..x.len().min(3)], 6, 0.0)
}

fn seed_similarity(x: &[f64]) -> Vec<f64> {
    let mut out = padded(x, 6, 0.0);
    out.push(1.0);
    out
}

// the isotropic scale becomes the initial scale of every axis
fn seed_scaling(x: &[f64]) -> Vec<f64> {
    let scale = x.get(6).copied().unwrap_or(1.0);
    let mut out = padded(x, 6, 0.0);
    out.extend([scale; 3]);
    out
}

fn seed_affine(x: &[f64]) -> Vec<f64> {
    let mut out = padded(x, 9, 1.0);
    out.extend([0.0; 3]);
    out
}

/// The stages in the order they run.
pub const PROGRESSIVE_STAGES: [ProgressiveStage; 5] = [
    ProgressiveStage {
        kind: TransformKind::Translation,
        seed: seed_translation,
    },
    ProgressiveStage {
        kind: TransformKind::Rigid,
        seed: seed_rigid,
    },
    ProgressiveStage {
        kind: TransformKind::Similarity,
        seed: seed_similarity,
    },
    ProgressiveStage {
        kind: TransformKind::Scaling,
        seed: seed_scaling,
    },
    ProgressiveStage {
        kind: TransformKind::Affine,
        seed: seed_affine,
    },
];

/// The stages to run to reach `target`, target included.
pub fn stages_until(target: TransformKind) -> impl Iterator<Item = &'static ProgressiveStage> {
    PROGRESSIVE_STAGES.iter().take_while(move |s| s.kind <= target)
}

/// Register by starting with a translation, then rigid, similarity, scaling and finally
/// affine, stopping at `target`.
///
/// Every stage starts from the optimum of the previous one with a fresh metric and engine.
///
/// # Arguments
///
/// * `static_bundle` - The reference streamlines.
/// * `moving` - The streamlines to move.
/// * `metric` - The metric built for every stage.
/// * `target` - The last transform family to optimize.
/// * `bounds` - Bounds of at least `target.num_params()` parameters; each stage uses the
///   leading ones.
/// * `method` - Name of the minimizer.
/// * `num_threads` - Workers of the parallel metrics.
///
/// # Returns
///
/// The output of the last stage.
pub fn progressive_slr(
    static_bundle: &Bundle,
    moving: &Bundle,
    metric: MetricKind,
    target: TransformKind,
    bounds: &[(f64, f64)],
    method: &str,
    num_threads: Option<i32>,
) -> Result<RegistrationOutput, RegistrationError> {
    if bounds.len() < target.num_params() {
        return Err(RegistrationError::ConfigurationError(format!(
            "{} registration needs {} bounds, got {}",
            target,
            target.num_params(),
            bounds.len()
        )));
    }

    log::info!("Progressive registration up to {}", target);

    let mut output: Option<RegistrationOutput> = None;
    for stage in stages_until(target) {
        let dim = stage.kind.num_params();
        let x0 = (stage.seed)(output.as_ref().map_or(&[][..], |o| o.xopt()));
        log::info!(" {} ({} parameters)...", stage.kind, dim);

        let config = SlrConfig {
            metric,
            x0: InitialParams::Params(x0),
            method: method.to_string(),
            bounds: Some(bounds[..dim].to_vec()),
            num_threads,
            ..Default::default()
        };
        let mut slr = StreamlineLinearRegistration::new(&config)?;
        output = Some(slr.optimize(static_bundle, moving, None)?);
    }

    output.ok_or_else(|| {
        RegistrationError::EmptyResult(String::from("no progressive stage was run"))
    })
}
