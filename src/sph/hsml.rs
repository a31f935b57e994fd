use super::config::SimulationConfig;
use super::error::CoreError;
use super::particles::{ParticleKind, ParticleStore};
use crate::units::{Real, NUM_DIMS};

/// Multiplicative window of the unbracketed smoothing-length update.
const HSML_STEP_FACTOR: Real = 1.26;

/// Relative bracket width below which the search gives up and accepts
/// the current smoothing length.
const BRACKET_COLLAPSE: Real = 1.0e-3;

/// Checks whether particle `i` found an acceptable number of neighbors
/// and, if not, proposes a new smoothing length from the bracket state
/// in `left`/`right`.
///
/// Returns true when the particle is finished for this step, either
/// because the neighbor count is inside the tolerance, because the
/// smoothing length is pinned at the configured minimum, or because the
/// bracket has collapsed. A particle that is not finished has
/// `density_done` left unset so the next density sweep picks it up
/// again.
pub(crate) fn update_smoothing_length(
    store: &mut ParticleStore,
    i: usize,
    left: &mut [Real],
    right: &mut [Real],
    cfg: &SimulationConfig,
) -> Result<bool, CoreError> {
    let num_ngb = store.hydro.num_ngb[i];
    let mut des = cfg.des_num_ngb;
    if store.kinds[i] == ParticleKind::Sink {
        des *= cfg.sink_ngb_factor;
    }
    let dev = cfg.max_ngb_deviation;

    let too_few = num_ngb < des - dev;
    let too_many = num_ngb > des + dev && store.hsml[i] > 1.01 * cfg.min_gas_hsml;

    if !too_few && !too_many {
        store.density_done[i] = true;
        return Ok(true);
    }

    if store.density_done[i] {
        return Err(CoreError::Invariant(format!(
            "particle {} rescheduled although its density iteration is already done",
            store.ids[i]
        )));
    }

    if left[i] > 0.0 && right[i] > 0.0 && (right[i] - left[i]) < BRACKET_COLLAPSE * left[i] {
        // bracket collapsed; this one is as converged as it will get
        store.density_done[i] = true;
        return Ok(true);
    }

    if too_few {
        left[i] = left[i].max(store.hsml[i]);
    } else if right[i] != 0.0 {
        right[i] = right[i].min(store.hsml[i]);
    } else {
        right[i] = store.hsml[i];
    }

    if left[i] > 0.0 && right[i] > 0.0 {
        // midpoint in kernel volume
        store.hsml[i] = (0.5 * (left[i].powi(3) + right[i].powi(3))).cbrt();
    } else {
        if right[i] == 0.0 && left[i] == 0.0 {
            return Err(CoreError::Invariant(format!(
                "particle {} has neither bracket side set",
                store.ids[i]
            )));
        }

        let newton_applies =
            store.kinds[i] == ParticleKind::Gas && (num_ngb - des).abs() < 0.5 * des;
        let newton_factor =
            1.0 - (num_ngb - des) / (NUM_DIMS * num_ngb) * store.hydro.dhsml_factor[i];

        if right[i] == 0.0 {
            // unbounded above: grow
            if newton_applies {
                store.hsml[i] *= newton_factor.min(HSML_STEP_FACTOR);
            } else {
                store.hsml[i] *= HSML_STEP_FACTOR;
            }
        } else {
            // unbounded below: shrink
            if newton_applies {
                store.hsml[i] *= newton_factor.max(1.0 / HSML_STEP_FACTOR);
            } else {
                store.hsml[i] /= HSML_STEP_FACTOR;
            }
        }
    }

    if store.hsml[i] < cfg.min_gas_hsml {
        store.hsml[i] = cfg.min_gas_hsml;
    }

    Ok(false)
}
