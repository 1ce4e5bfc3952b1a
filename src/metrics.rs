//! Metrics hooks, recorded through the `metrics` facade when the feature is on.
//!
//! Every counter carries a `policy` label so the three overload strategies can
//! be compared side by side.

use crate::mediator::Offer;
use crate::pipeline::RunOutcome;
use crate::policy::BackpressurePolicy;

#[cfg(feature = "metrics")]
mod imp {
    use super::*;

    pub(crate) fn record_offer(policy: BackpressurePolicy, offer: Offer) {
        let outcome = match offer {
            Offer::Accepted => "accepted",
            Offer::Dropped => "dropped",
            Offer::Replaced => "replaced",
            Offer::Rejected => "rejected",
        };
        metrics::counter!(
            "backflow_items_offered_total",
            "policy" => policy.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub(crate) fn record_delivered(policy: BackpressurePolicy) {
        metrics::counter!("backflow_items_delivered_total", "policy" => policy.as_str())
            .increment(1);
    }

    pub(crate) fn record_run_finished(policy: BackpressurePolicy, outcome: &RunOutcome) {
        metrics::counter!(
            "backflow_runs_total",
            "policy" => policy.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);
        if let Some(summary) = outcome.summary() {
            metrics::gauge!("backflow_run_dropped", "policy" => policy.as_str())
                .set(summary.dropped as f64);
        }
    }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    use super::*;

    #[inline]
    pub(crate) fn record_offer(_policy: BackpressurePolicy, _offer: Offer) {}

    #[inline]
    pub(crate) fn record_delivered(_policy: BackpressurePolicy) {}

    #[inline]
    pub(crate) fn record_run_finished(_policy: BackpressurePolicy, _outcome: &RunOutcome) {}
}

pub(crate) use imp::*;
