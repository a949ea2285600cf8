use crate::{
    caps::CapMinTimeMap,
    codec::{self, Decode, Encode},
    condition::{CapScope, ConditionMap},
    context::SelectionContext,
    AdvertiserId, ConditionId, CounterId, CreativeId, GroupId,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{Read, Write},
};

/// How the creative markup is put on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Injection {
    Direct,
    Frame,
}

impl Default for Injection {
    fn default() -> Self {
        Self::Direct
    }
}

impl From<Injection> for u32 {
    fn from(injection: Injection) -> Self {
        match injection {
            Injection::Direct => 0,
            Injection::Frame => 1,
        }
    }
}

impl TryFrom<u32> for Injection {
    type Error = codec::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Direct),
            1 => Ok(Self::Frame),
            unknown => Err(codec::Error::UnknownInjection(unknown)),
        }
    }
}

impl fmt::Display for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Frame => f.write_str("frame"),
        }
    }
}

/// Marks the capping group as capped when any attached condition declares a
/// group cap, keeping the first registered minimum time per group.
fn finalize_group_cap(
    condition_ids: &[ConditionId],
    conditions: &ConditionMap,
    group: GroupId,
    min_time: u64,
    capped_groups: &mut CapMinTimeMap,
) -> bool {
    let group_cap = condition_ids.iter().any(|id| {
        conditions
            .get(id)
            .map_or(false, |condition| condition.declares_group_cap())
    });

    if group_cap {
        capped_groups.entry(group).or_insert(min_time);
    }

    group_cap
}

fn all_match(
    condition_ids: &[ConditionId],
    conditions: &ConditionMap,
    context: &SelectionContext,
    group: GroupId,
    scope: CapScope,
) -> bool {
    condition_ids.iter().all(|id| {
        conditions
            .get(id)
            .map_or(false, |condition| condition.matches(context, group, scope))
    })
}

fn push_unique(condition_ids: &mut Vec<ConditionId>, id: ConditionId) {
    if !condition_ids.contains(&id) {
        condition_ids.push(id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Creative {
    pub id: CreativeId,
    pub group: GroupId,
    /// Derived by [`Creative::finalize`]
    pub group_cap: bool,
    /// Caps of the group older than this are ignored
    pub group_cap_min_time: u64,
    pub width: u32,
    pub height: u32,
    pub weight: f64,
    pub advertiser: AdvertiserId,
    pub text: String,
    pub inject: Injection,
    pub conditions: Vec<ConditionId>,
}

impl Creative {
    pub fn new(id: CreativeId, group: GroupId, advertiser: AdvertiserId, weight: f64) -> Self {
        Self {
            id,
            group,
            group_cap: false,
            group_cap_min_time: 0,
            width: 0,
            height: 0,
            weight,
            advertiser,
            text: String::new(),
            inject: Injection::default(),
            conditions: Vec::new(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_inject(mut self, inject: Injection) -> Self {
        self.inject = inject;
        self
    }

    pub fn with_group_cap_min_time(mut self, min_time: u64) -> Self {
        self.group_cap_min_time = min_time;
        self
    }

    pub fn with_condition(mut self, id: ConditionId) -> Self {
        self.add_condition(id);
        self
    }

    pub fn add_condition(&mut self, id: ConditionId) {
        push_unique(&mut self.conditions, id);
    }

    pub fn finalize(&mut self, conditions: &ConditionMap, capped_groups: &mut CapMinTimeMap) {
        self.group_cap = finalize_group_cap(
            &self.conditions,
            conditions,
            self.group,
            self.group_cap_min_time,
            capped_groups,
        );
    }

    pub fn matches(&self, conditions: &ConditionMap, context: &SelectionContext) -> bool {
        all_match(
            &self.conditions,
            conditions,
            context,
            self.group,
            CapScope::Ad,
        )
    }
}

impl Encode for Creative {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.id.encode(writer)?;
        self.group.encode(writer)?;
        self.group_cap.encode(writer)?;
        self.group_cap_min_time.encode(writer)?;
        self.width.encode(writer)?;
        self.height.encode(writer)?;
        self.weight.encode(writer)?;
        self.advertiser.encode(writer)?;
        self.text.encode(writer)?;
        u32::from(self.inject).encode(writer)?;
        self.conditions.encode(writer)
    }
}

impl Decode for Creative {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        Ok(Self {
            id: Decode::decode(reader)?,
            group: Decode::decode(reader)?,
            group_cap: Decode::decode(reader)?,
            group_cap_min_time: Decode::decode(reader)?,
            width: Decode::decode(reader)?,
            height: Decode::decode(reader)?,
            weight: Decode::decode(reader)?,
            advertiser: Decode::decode(reader)?,
            text: Decode::decode(reader)?,
            inject: Injection::try_from(u32::decode(reader)?)?,
            conditions: Decode::decode(reader)?,
        })
    }
}

/// A tracking pixel or script.
///
/// Every matching counter is shown, so it has no weight and doesn't compete
/// for slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub id: CounterId,
    pub group: GroupId,
    pub group_cap: bool,
    pub group_cap_min_time: u64,
    pub advertiser: AdvertiserId,
    pub text: String,
    pub conditions: Vec<ConditionId>,
}

impl Counter {
    pub fn new(id: CounterId, group: GroupId, advertiser: AdvertiserId) -> Self {
        Self {
            id,
            group,
            group_cap: false,
            group_cap_min_time: 0,
            advertiser,
            text: String::new(),
            conditions: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_condition(mut self, id: ConditionId) -> Self {
        self.add_condition(id);
        self
    }

    pub fn add_condition(&mut self, id: ConditionId) {
        push_unique(&mut self.conditions, id);
    }

    pub fn finalize(&mut self, conditions: &ConditionMap, capped_groups: &mut CapMinTimeMap) {
        self.group_cap = finalize_group_cap(
            &self.conditions,
            conditions,
            self.group,
            self.group_cap_min_time,
            capped_groups,
        );
    }

    pub fn matches(&self, conditions: &ConditionMap, context: &SelectionContext) -> bool {
        all_match(
            &self.conditions,
            conditions,
            context,
            self.group,
            CapScope::Counter,
        )
    }
}

impl Encode for Counter {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.id.encode(writer)?;
        self.group.encode(writer)?;
        self.group_cap.encode(writer)?;
        self.group_cap_min_time.encode(writer)?;
        self.advertiser.encode(writer)?;
        self.text.encode(writer)?;
        self.conditions.encode(writer)
    }
}

impl Decode for Counter {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        Ok(Self {
            id: Decode::decode(reader)?,
            group: Decode::decode(reader)?,
            group_cap: Decode::decode(reader)?,
            group_cap_min_time: Decode::decode(reader)?,
            advertiser: Decode::decode(reader)?,
            text: Decode::decode(reader)?,
            conditions: Decode::decode(reader)?,
        })
    }
}
