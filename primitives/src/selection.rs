use crate::{
    caps::GroupCaps,
    creative::{Creative, Injection},
    CounterId, CreativeId, SlotId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A creative placed into a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub id: CreativeId,
    pub slot: SlotId,
    pub width: u32,
    pub height: u32,
    pub text: String,
    pub inject: Injection,
}

impl Selection {
    pub fn new(creative: &Creative, slot: SlotId) -> Self {
        Self {
            id: creative.id,
            slot,
            width: creative.width,
            height: creative.height,
            text: creative.text.clone(),
            inject: creative.inject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedCounter {
    pub id: CounterId,
    pub text: String,
}

/// Outcome of a page view: what to show and the caps to hand back to the
/// caller for the next view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub ads: Vec<Selection>,
    pub counters: Vec<SelectedCounter>,
    pub ad_caps: GroupCaps,
    pub counter_caps: GroupCaps,
}

impl fmt::Display for SelectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ads: {}", self.ads.len())?;
        for ad in &self.ads {
            writeln!(
                f,
                "  creative {} in slot {} ({}x{}, {})",
                ad.id, ad.slot, ad.width, ad.height, ad.inject
            )?;
        }

        writeln!(f, "counters: {}", self.counters.len())?;
        for counter in &self.counters {
            writeln!(f, "  counter {}", counter.id)?;
        }

        for (name, caps) in [("ad caps", &self.ad_caps), ("counter caps", &self.counter_caps)] {
            writeln!(f, "{}: {} at {}", name, caps.len(), caps.current_time)?;
            for (group, cap) in &caps.caps {
                writeln!(f, "  group {}: count {}, time {}", group, cap.count, cap.time)?;
            }
        }

        Ok(())
    }
}
