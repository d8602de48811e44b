//! Hardfork activation schedule.
//!
//! Historical blocks must replay bit-for-bit, so several engine rules
//! switch behavior at named activation timestamps. The schedule is
//! supplied by the embedding layer (the core never hardcodes absolute
//! dates); every conditional site branches on
//! `block_time >= schedule.hf_x`.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::TimePoint;

/// Named activation timestamps the engine branches on.
///
/// | Field | Behavior switched on activation |
/// |---|---|
/// | `hf_436` | margin calls respect the max-short-squeeze guard |
/// | `hf_460` | prediction markets no longer black-swan on bad feeds |
/// | `hf_615` | feed-expiry sweep uses the corrected comparison |
/// | `hf_973` | asset authorization gates cover every involved asset |
/// | `bsip_77` | initial collateral ratio (ICR) may be set and is enforced |
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HardforkSchedule {
    pub hf_436: TimePoint,
    pub hf_460: TimePoint,
    pub hf_615: TimePoint,
    pub hf_973: TimePoint,
    pub bsip_77: TimePoint,
}

impl HardforkSchedule {
    /// Every hardfork already active at genesis. This is the schedule a
    /// fresh chain would use.
    pub fn all_active() -> Self {
        Self {
            hf_436: TimePoint(0),
            hf_460: TimePoint(0),
            hf_615: TimePoint(0),
            hf_973: TimePoint(0),
            bsip_77: TimePoint(0),
        }
    }

    /// No hardfork ever activates. Used to exercise legacy behavior.
    pub fn none_active() -> Self {
        Self {
            hf_436: TimePoint::MAX,
            hf_460: TimePoint::MAX,
            hf_615: TimePoint::MAX,
            hf_973: TimePoint::MAX,
            bsip_77: TimePoint::MAX,
        }
    }
}

impl Default for HardforkSchedule {
    fn default() -> Self {
        Self::all_active()
    }
}
