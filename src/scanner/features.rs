//! Mode capability matrix
//!
//! A pure, stateless table keyed by operating mode. All runtime gating
//! goes through these lookups rather than mode branches scattered
//! across callers.

use crate::config::Mode;

use super::findings::IssueKind;

use IssueKind::*;

const SAFE: &[IssueKind] = &[];
const SAFE_PLUS: &[IssueKind] = &[XssReflected, SqliError, CorsMisconfig, OpenRedirect];
const AGGRESSIVE_LITE: &[IssueKind] = &[OpenRedirect, PathTraversal, Ssti, MixedContent];
const AGGRESSIVE: &[IssueKind] = &[
    XssReflected,
    SqliError,
    CorsMisconfig,
    OpenRedirect,
    PathTraversal,
    Ssti,
    MixedContent,
];

/// Active probe categories enabled for a mode
pub fn active_categories(mode: Mode) -> &'static [IssueKind] {
    match mode {
        Mode::Safe => SAFE,
        Mode::SafePlus => SAFE_PLUS,
        Mode::AggressiveLite => AGGRESSIVE_LITE,
        Mode::Aggressive => AGGRESSIVE,
    }
}

/// Whether a mode enables at least one active category. False only for
/// Safe, which skips constructing the active pipeline entirely.
pub fn is_any_active(mode: Mode) -> bool {
    !active_categories(mode).is_empty()
}

pub fn is_category_active(mode: Mode, kind: IssueKind) -> bool {
    active_categories(mode).contains(&kind)
}

/// Per-mode tuning defaults
#[derive(Debug, Clone, Copy)]
pub struct ModeDefaults {
    /// Maximum endpoints subjected to active probing
    pub endpoint_cap: usize,

    /// Default maximum injected parameters per URL
    pub max_params_per_url: usize,

    /// Active-probe rate window, requests per second
    pub probe_rps_min: f64,
    pub probe_rps_max: f64,
}

pub fn defaults(mode: Mode) -> ModeDefaults {
    match mode {
        Mode::Safe => ModeDefaults {
            endpoint_cap: 0,
            max_params_per_url: 0,
            probe_rps_min: 0.0,
            probe_rps_max: 0.0,
        },
        Mode::SafePlus => ModeDefaults {
            endpoint_cap: 100,
            max_params_per_url: 6,
            probe_rps_min: 0.5,
            probe_rps_max: 3.0,
        },
        Mode::AggressiveLite => ModeDefaults {
            endpoint_cap: 150,
            max_params_per_url: 8,
            probe_rps_min: 1.0,
            probe_rps_max: 5.0,
        },
        Mode::Aggressive => ModeDefaults {
            endpoint_cap: 250,
            max_params_per_url: 10,
            probe_rps_min: 1.0,
            probe_rps_max: 8.0,
        },
    }
}

/// Active-probe request rate: the passive rate clamped into the mode's
/// window.
pub fn probe_rps(mode: Mode, passive_rps: f64) -> f64 {
    let defaults = defaults(mode);
    passive_rps.clamp(defaults.probe_rps_min, defaults.probe_rps_max)
}
