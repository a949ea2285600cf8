use crate::{
    caps::CapMinTimeMap,
    codec::{self, Decode, Encode},
    condition::ConditionMap,
    creative::{Counter, Creative},
    AdvertiserId, ConditionId, PageId, SlotId,
};
use std::{
    collections::BTreeMap,
    io::{Read, Write},
    ops::RangeInclusive,
};

pub type SlotMap = BTreeMap<SlotId, Slot>;
pub type AdvRestrictionMap = BTreeMap<AdvertiserId, AdvRestriction>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slot {
    pub creatives: Vec<Creative>,
}

impl Encode for Slot {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.creatives.encode(writer)
    }
}

impl Decode for Slot {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        Ok(Self {
            creatives: Decode::decode(reader)?,
        })
    }
}

/// Combined limit for two advertisers appearing on the same page view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvMaxAdNum {
    pub advertiser: AdvertiserId,
    pub max_ad_num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvRestriction {
    /// Ads of the advertiser per page view
    pub max_ad_num: u32,
    pub adv_max_ad_nums: Vec<AdvMaxAdNum>,
}

impl AdvRestriction {
    pub fn new(max_ad_num: u32) -> Self {
        Self {
            max_ad_num,
            adv_max_ad_nums: Vec::new(),
        }
    }
}

impl Encode for AdvRestriction {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.max_ad_num.encode(writer)?;
        codec::write_len(writer, self.adv_max_ad_nums.len())?;

        for pair in &self.adv_max_ad_nums {
            pair.advertiser.encode(writer)?;
            pair.max_ad_num.encode(writer)?;
        }

        Ok(())
    }
}

impl Decode for AdvRestriction {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        let max_ad_num = u32::decode(reader)?;
        let len = codec::read_len(reader)?;

        let mut adv_max_ad_nums = Vec::new();
        for _ in 0..len {
            adv_max_ad_nums.push(AdvMaxAdNum {
                advertiser: Decode::decode(reader)?,
                max_ad_num: Decode::decode(reader)?,
            });
        }

        Ok(Self {
            max_ad_num,
            adv_max_ad_nums,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub slots: SlotMap,
    pub counters: Vec<Counter>,
    pub adv_restrictions: AdvRestrictionMap,
    /// Ads shown per page view at most, no ads at all when zero
    pub max_ad_num: u32,
}

impl Page {
    pub fn new(max_ad_num: u32) -> Self {
        Self {
            max_ad_num,
            ..Self::default()
        }
    }

    pub fn with_slots(slots: RangeInclusive<SlotId>) -> Self {
        Self {
            slots: slots.map(|slot| (slot, Slot::default())).collect(),
            ..Self::default()
        }
    }

    /// Limits the ads of `advertiser`, keeping the stricter of repeated limits.
    pub fn add_max_ad_num(&mut self, advertiser: AdvertiserId, max_ad_num: u32) {
        self.adv_restrictions
            .entry(advertiser)
            .and_modify(|restriction| {
                restriction.max_ad_num = restriction.max_ad_num.min(max_ad_num)
            })
            .or_insert_with(|| AdvRestriction::new(max_ad_num));
    }

    /// Limits the ads of two advertisers shown together.
    pub fn add_pair_max_ad_num(
        &mut self,
        advertiser: AdvertiserId,
        other: AdvertiserId,
        max_ad_num: u32,
    ) {
        for (from, to) in [(advertiser, other), (other, advertiser)] {
            self.adv_restrictions
                .entry(from)
                .or_insert_with(|| AdvRestriction::new(u32::MAX))
                .adv_max_ad_nums
                .push(AdvMaxAdNum {
                    advertiser: to,
                    max_ad_num,
                });
        }
    }

    /// Derives group caps and drops the slots left without creatives.
    pub fn finalize(&mut self, conditions: &ConditionMap, capped_groups: &mut CapMinTimeMap) {
        for slot in self.slots.values_mut() {
            for creative in &mut slot.creatives {
                creative.finalize(conditions, capped_groups);
            }
        }

        self.slots.retain(|_, slot| !slot.creatives.is_empty());

        for counter in &mut self.counters {
            counter.finalize(conditions, capped_groups);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.counters.is_empty()
    }

    /// Every condition referenced by the page's creatives and counters.
    pub fn condition_ids(&self) -> impl Iterator<Item = ConditionId> + '_ {
        self.slots
            .values()
            .flat_map(|slot| slot.creatives.iter())
            .flat_map(|creative| creative.conditions.iter().copied())
            .chain(
                self.counters
                    .iter()
                    .flat_map(|counter| counter.conditions.iter().copied()),
            )
    }
}

impl Encode for Page {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.max_ad_num.encode(writer)?;
        self.adv_restrictions.encode(writer)?;
        self.slots.encode(writer)?;
        self.counters.encode(writer)
    }
}

impl Decode for Page {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        Ok(Self {
            max_ad_num: Decode::decode(reader)?,
            adv_restrictions: Decode::decode(reader)?,
            slots: Decode::decode(reader)?,
            counters: Decode::decode(reader)?,
        })
    }
}

/// The pages every news site has, with their fixed slot ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    DeskPaper,
    DeskNline,
    DeskColumn,
    TabPaper,
    TabNline,
    TabColumn,
    MobNline,
    MobColumn,
    DeskMessage,
    TabMessage,
    MobMessage,
}

impl PageKind {
    pub const ALL: [PageKind; 11] = [
        PageKind::DeskPaper,
        PageKind::DeskNline,
        PageKind::DeskColumn,
        PageKind::TabPaper,
        PageKind::TabNline,
        PageKind::TabColumn,
        PageKind::MobNline,
        PageKind::MobColumn,
        PageKind::DeskMessage,
        PageKind::TabMessage,
        PageKind::MobMessage,
    ];

    pub fn id(self) -> PageId {
        match self {
            Self::DeskPaper => 1,
            Self::DeskNline => 2,
            Self::DeskColumn => 3,
            Self::TabPaper => 4,
            Self::TabNline => 5,
            Self::TabColumn => 6,
            Self::MobNline => 7,
            Self::MobColumn => 8,
            Self::DeskMessage => 9,
            Self::TabMessage => 10,
            Self::MobMessage => 11,
        }
    }

    pub fn slots(self) -> RangeInclusive<SlotId> {
        use slot::*;

        match self {
            Self::DeskPaper => DESK_PAPER_MSG1..=DESK_PAPER_BASEMENT,
            Self::DeskNline => DESK_NLINE_MSA1..=DESK_NLINE_BASEMENT,
            Self::DeskColumn => DESK_COLUMN_MSG1..=DESK_COLUMN_BASEMENT,
            Self::TabPaper => TAB_PAPER_MSG1..=TAB_PAPER_BASEMENT,
            Self::TabNline => TAB_NLINE_MSA1..=TAB_NLINE_BASEMENT,
            Self::TabColumn => TAB_COLUMN_MSG1..=TAB_COLUMN_BASEMENT,
            Self::MobNline => MOB_NLINE_MSA1..=MOB_NLINE_BASEMENT,
            Self::MobColumn => MOB_COLUMN_MSG1..=MOB_COLUMN_BASEMENT,
            Self::DeskMessage => DESK_MESSAGE_IMG..=DESK_MESSAGE_BASEMENT,
            Self::TabMessage => TAB_MESSAGE_IMG..=TAB_MESSAGE_BASEMENT,
            Self::MobMessage => MOB_MESSAGE_IMG..=MOB_MESSAGE_BASEMENT,
        }
    }
}

impl TryFrom<PageId> for PageKind {
    type Error = PageId;

    fn try_from(id: PageId) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.id() == id)
            .ok_or(id)
    }
}

/// Slot ids of the standard pages.
pub mod slot {
    use crate::SlotId;

    pub const DESK_PAPER_MSG1: SlotId = 1;
    pub const DESK_PAPER_MSG2: SlotId = 2;
    pub const DESK_PAPER_MSA1: SlotId = 3;
    pub const DESK_PAPER_MSA2: SlotId = 4;
    pub const DESK_PAPER_RTB1: SlotId = 5;
    pub const DESK_PAPER_RTB2: SlotId = 6;
    pub const DESK_PAPER_ROOF: SlotId = 7;
    pub const DESK_PAPER_BASEMENT: SlotId = 8;

    pub const DESK_NLINE_MSA1: SlotId = 1000;
    pub const DESK_NLINE_RTB1: SlotId = 1001;
    pub const DESK_NLINE_RTB2: SlotId = 1002;
    pub const DESK_NLINE_ROOF: SlotId = 1003;
    pub const DESK_NLINE_BASEMENT: SlotId = 1004;

    pub const DESK_COLUMN_MSG1: SlotId = 2000;
    pub const DESK_COLUMN_MSG2: SlotId = 2001;
    pub const DESK_COLUMN_MSA1: SlotId = 2002;
    pub const DESK_COLUMN_RTB1: SlotId = 2003;
    pub const DESK_COLUMN_RTB2: SlotId = 2004;
    pub const DESK_COLUMN_ROOF: SlotId = 2005;
    pub const DESK_COLUMN_BASEMENT: SlotId = 2006;

    pub const TAB_PAPER_MSG1: SlotId = 3000;
    pub const TAB_PAPER_MSG2: SlotId = 3001;
    pub const TAB_PAPER_MSA1: SlotId = 3002;
    pub const TAB_PAPER_MSA2: SlotId = 3003;
    pub const TAB_PAPER_RTB1: SlotId = 3004;
    pub const TAB_PAPER_RTB2: SlotId = 3005;
    pub const TAB_PAPER_ROOF: SlotId = 3006;
    pub const TAB_PAPER_BASEMENT: SlotId = 3007;

    pub const TAB_NLINE_MSA1: SlotId = 4000;
    pub const TAB_NLINE_RTB1: SlotId = 4001;
    pub const TAB_NLINE_RTB2: SlotId = 4002;
    pub const TAB_NLINE_ROOF: SlotId = 4003;
    pub const TAB_NLINE_BASEMENT: SlotId = 4004;

    pub const TAB_COLUMN_MSG1: SlotId = 5000;
    pub const TAB_COLUMN_MSG2: SlotId = 5001;
    pub const TAB_COLUMN_MSA1: SlotId = 5002;
    pub const TAB_COLUMN_RTB1: SlotId = 5003;
    pub const TAB_COLUMN_RTB2: SlotId = 5004;
    pub const TAB_COLUMN_ROOF: SlotId = 5005;
    pub const TAB_COLUMN_BASEMENT: SlotId = 5006;

    pub const MOB_NLINE_MSA1: SlotId = 6000;
    pub const MOB_NLINE_ROOF: SlotId = 6001;
    pub const MOB_NLINE_BASEMENT: SlotId = 6002;

    pub const MOB_COLUMN_MSG1: SlotId = 7000;
    pub const MOB_COLUMN_MSG2: SlotId = 7001;
    pub const MOB_COLUMN_MSA1: SlotId = 7002;
    pub const MOB_COLUMN_ROOF: SlotId = 7003;
    pub const MOB_COLUMN_BASEMENT: SlotId = 7004;

    pub const DESK_MESSAGE_IMG: SlotId = 8000;
    pub const DESK_MESSAGE_MSG1: SlotId = 8001;
    pub const DESK_MESSAGE_MSG2: SlotId = 8002;
    pub const DESK_MESSAGE_RTB1: SlotId = 8003;
    pub const DESK_MESSAGE_RTB2: SlotId = 8004;
    pub const DESK_MESSAGE_ROOF: SlotId = 8005;
    pub const DESK_MESSAGE_BASEMENT: SlotId = 8006;

    pub const TAB_MESSAGE_IMG: SlotId = 9000;
    pub const TAB_MESSAGE_MSG1: SlotId = 9001;
    pub const TAB_MESSAGE_MSG2: SlotId = 9002;
    pub const TAB_MESSAGE_RTB1: SlotId = 9003;
    pub const TAB_MESSAGE_RTB2: SlotId = 9004;
    pub const TAB_MESSAGE_ROOF: SlotId = 9005;
    pub const TAB_MESSAGE_BASEMENT: SlotId = 9006;

    pub const MOB_MESSAGE_IMG: SlotId = 10000;
    pub const MOB_MESSAGE_MSG1: SlotId = 10001;
    pub const MOB_MESSAGE_MSG2: SlotId = 10002;
    pub const MOB_MESSAGE_ROOF: SlotId = 10003;
    pub const MOB_MESSAGE_BASEMENT: SlotId = 10004;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::condition::Condition;
    use pretty_assertions::assert_eq;

    #[test]
    fn advertiser_limits_keep_the_strictest() {
        let mut page = Page::default();
        page.add_max_ad_num(1, 3);
        page.add_max_ad_num(1, 5);
        page.add_max_ad_num(1, 2);

        assert_eq!(2, page.adv_restrictions[&1].max_ad_num);
    }

    #[test]
    fn pair_limits_are_symmetric() {
        let mut page = Page::default();
        page.add_max_ad_num(1, 4);
        page.add_pair_max_ad_num(1, 2, 3);

        assert_eq!(4, page.adv_restrictions[&1].max_ad_num);
        assert_eq!(u32::MAX, page.adv_restrictions[&2].max_ad_num);
        assert_eq!(
            vec![AdvMaxAdNum {
                advertiser: 2,
                max_ad_num: 3
            }],
            page.adv_restrictions[&1].adv_max_ad_nums
        );
        assert_eq!(
            vec![AdvMaxAdNum {
                advertiser: 1,
                max_ad_num: 3
            }],
            page.adv_restrictions[&2].adv_max_ad_nums
        );
    }

    #[test]
    fn finalize_drops_empty_slots() {
        let conditions: ConditionMap = vec![(1, Condition::new(1).with_group_caps(30, 0))]
            .into_iter()
            .collect();

        let mut page = Page::with_slots(slot::MOB_NLINE_MSA1..=slot::MOB_NLINE_BASEMENT);
        page.slots
            .get_mut(&slot::MOB_NLINE_ROOF)
            .expect("Should have the slot")
            .creatives
            .push(Creative::new(1, 5, 1, 1.0).with_condition(1));

        let mut capped_groups = CapMinTimeMap::new();
        page.finalize(&conditions, &mut capped_groups);

        assert_eq!(
            vec![slot::MOB_NLINE_ROOF],
            page.slots.keys().copied().collect::<Vec<_>>()
        );
        assert!(capped_groups.contains_key(&5));
        assert!(!page.is_empty());
    }

    #[test]
    fn standard_layout() {
        assert_eq!(8, PageKind::DeskPaper.slots().count());
        assert_eq!(3, PageKind::MobNline.slots().count());
        assert_eq!(10000..=10004, PageKind::MobMessage.slots());
        assert_eq!(Ok(PageKind::TabColumn), PageKind::try_from(6));
        assert_eq!(Err(12), PageKind::try_from(12));
    }
}
