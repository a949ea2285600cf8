//! The [`Selector`]: pages, slots, creatives, counters and conditions of a
//! site together with the selection over them.
use crate::{
    placement::{select_best_placement, SelectedSlot, TraversalContext},
    strategy::{CreativeWeight, CreativeWeightStrategy},
    Error,
};
use primitives::{
    codec::{self, Decode, Encode},
    util::logging::discard_logger,
    CapMinTimeMap, Condition, ConditionId, ConditionMap, Counter, Creative, GroupCap, GroupCaps,
    Page, PageId, PageKind, SelectedCounter, Selection, SelectionContext, SelectionResult, SlotId,
    UpdateNumber,
};
use rand::Rng;
use slog::{debug, info, Logger};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    io::{Read, Write},
};

/// Creatives lighter than this never take part in the selection.
pub const MIN_CREATIVE_WEIGHT: f64 = 0.0001;

pub type PageMap = BTreeMap<PageId, Page>;

#[derive(Debug, Clone)]
pub struct Selector {
    /// Seconds an ad group cap is honoured
    pub group_cap_timeout: u64,
    pub group_cap_max_count: u64,
    /// Seconds a counter group cap is honoured
    pub counter_cap_timeout: u64,
    pub counter_cap_max_count: u64,
    pub update_number: UpdateNumber,
    pub conditions: ConditionMap,
    /// Rebuilt by [`Selector::finalize`]
    pub capped_groups_min_times: CapMinTimeMap,
    pub pages: PageMap,
    pub creative_weight_strategy: CreativeWeightStrategy,
    logger: Logger,
}

impl Selector {
    pub const VERSION: u32 = 1;

    pub fn new(
        group_cap_timeout: u64,
        group_cap_max_count: u64,
        counter_cap_timeout: u64,
        counter_cap_max_count: u64,
        update_number: UpdateNumber,
    ) -> Self {
        Self {
            group_cap_timeout,
            group_cap_max_count,
            counter_cap_timeout,
            counter_cap_max_count,
            update_number,
            conditions: ConditionMap::new(),
            capped_groups_min_times: CapMinTimeMap::new(),
            pages: PageMap::new(),
            creative_weight_strategy: CreativeWeightStrategy::default(),
            logger: discard_logger(),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_strategy(mut self, strategy: CreativeWeightStrategy) -> Self {
        self.creative_weight_strategy = strategy;
        self
    }

    /// Creates every [`PageKind`] page with its slots.
    ///
    /// Pages and slots which end up without creatives and counters are pruned
    /// by [`Selector::finalize`].
    pub fn add_standard_pages(&mut self) {
        for kind in PageKind::ALL {
            let slots = kind.slots();
            self.add_page(kind.id(), *slots.start(), *slots.end());
        }
    }

    /// Adds the page with empty slots `slot_first..=slot_last`, keeping the
    /// page's existing content.
    pub fn add_page(
        &mut self,
        page_id: PageId,
        slot_first: SlotId,
        slot_last: SlotId,
    ) -> &mut Page {
        let page = self.pages.entry(page_id).or_default();

        for slot in slot_first..=slot_last {
            page.slots.insert(slot, Default::default());
        }

        page
    }

    pub fn page_mut(&mut self, page_id: PageId) -> &mut Page {
        self.pages.entry(page_id).or_default()
    }

    /// Registers a condition, replacing the one with the same id.
    pub fn add_condition(&mut self, condition: Condition) -> Option<Condition> {
        self.conditions.insert(condition.id, condition)
    }

    pub fn add_creative(
        &mut self,
        page_id: PageId,
        slot: SlotId,
        creative: Creative,
    ) -> Result<(), Error> {
        self.check_conditions(page_id, &creative.conditions)?;

        self.page_mut(page_id)
            .slots
            .entry(slot)
            .or_default()
            .creatives
            .push(creative);

        Ok(())
    }

    pub fn add_counter(&mut self, page_id: PageId, counter: Counter) -> Result<(), Error> {
        self.check_conditions(page_id, &counter.conditions)?;
        self.page_mut(page_id).counters.push(counter);

        Ok(())
    }

    fn check_conditions(&self, page: PageId, ids: &[ConditionId]) -> Result<(), Error> {
        match ids.iter().find(|&id| !self.conditions.contains_key(id)) {
            Some(&condition) => Err(Error::UnknownCondition { page, condition }),
            None => Ok(()),
        }
    }

    /// Derives group caps, drops empty slots and pages and rebuilds the
    /// capped groups. Must run after every change before selecting.
    pub fn finalize(&mut self) {
        self.capped_groups_min_times.clear();

        for page in self.pages.values_mut() {
            page.finalize(&self.conditions, &mut self.capped_groups_min_times);
        }

        let pages_before = self.pages.len();
        self.pages.retain(|_, page| !page.is_empty());

        info!(
            self.logger,
            "Selector finalized";
            "update_number" => self.update_number,
            "pages" => self.pages.len(),
            "pruned_pages" => pages_before - self.pages.len(),
            "capped_groups" => self.capped_groups_min_times.len()
        );
    }

    pub fn select(&self, context: &mut SelectionContext) -> SelectionResult {
        self.select_with_rng(context, &mut rand::thread_rng())
    }

    /// Selects ads and counters for the page view.
    ///
    /// The caps of `context` are cleaned up in place. The caps of the result
    /// are the ones to hand back to the caller.
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        context: &mut SelectionContext,
        rng: &mut R,
    ) -> SelectionResult {
        self.cleanup_caps(context);

        let mut result = SelectionResult::default();

        let page = match self.pages.get(&context.page) {
            Some(page) => page,
            None => {
                debug!(self.logger, "No such page"; "page" => context.page);

                result.ad_caps = context.ad_caps.clone();
                result.counter_caps = context.counter_caps.clone();
                return result;
            }
        };

        if !self.select_ads(page, context, &mut result, rng) {
            result.ad_caps = context.ad_caps.clone();
        }

        if !self.select_counters(page, context, &mut result) {
            result.counter_caps = context.counter_caps.clone();
        }

        debug!(
            self.logger,
            "Selection made";
            "page" => context.page,
            "ads" => result.ads.len(),
            "counters" => result.counters.len()
        );

        result
    }

    /// Drops the caps of the context which are no longer honoured.
    pub fn cleanup_caps(&self, context: &mut SelectionContext) {
        context
            .ad_caps
            .cleanup(self.group_cap_timeout, &self.capped_groups_min_times);
        context
            .counter_caps
            .cleanup(self.counter_cap_timeout, &self.capped_groups_min_times);
    }

    fn select_ads<R: Rng + ?Sized>(
        &self,
        page: &Page,
        context: &SelectionContext,
        result: &mut SelectionResult,
        rng: &mut R,
    ) -> bool {
        if page.max_ad_num == 0 {
            return false;
        }

        let mut slots = Vec::new();

        for &slot_id in &context.slots {
            let slot = match page.slots.get(&slot_id) {
                Some(slot) => slot,
                None => continue,
            };

            let mut creatives: Vec<CreativeWeight<'_>> = slot
                .creatives
                .iter()
                .filter(|creative| {
                    creative.weight >= MIN_CREATIVE_WEIGHT
                        && creative.matches(&self.conditions, context)
                })
                .map(CreativeWeight::new)
                .collect();

            self.creative_weight_strategy
                .set_weights(&mut creatives, rng);

            if !creatives.is_empty() {
                slots.push(SelectedSlot {
                    id: slot_id,
                    creatives,
                });
            }
        }

        if slots.is_empty() {
            return false;
        }

        let mut traversal = TraversalContext::new();
        for first in 0..slots.len() {
            select_best_placement(
                &slots[first..],
                &page.adv_restrictions,
                page.max_ad_num,
                &mut traversal,
            );
        }

        let mut ad_caps = context.ad_caps.clone();

        for placement in &traversal.best {
            result
                .ads
                .push(Selection::new(placement.creative, placement.slot));

            if placement.creative.group_cap {
                ad_caps.bump(placement.creative.group);
            }
        }

        ad_caps.evict_oldest(self.group_cap_max_count);
        result.ad_caps = ad_caps;

        true
    }

    fn select_counters(
        &self,
        page: &Page,
        context: &SelectionContext,
        result: &mut SelectionResult,
    ) -> bool {
        let mut counter_caps = GroupCaps::new(context.counter_caps.current_time);

        for counter in &page.counters {
            if !counter.matches(&self.conditions, context) {
                continue;
            }

            result.counters.push(SelectedCounter {
                id: counter.id,
                text: counter.text.clone(),
            });

            if counter.group_cap {
                counter_caps.caps.entry(counter.group).or_insert(GroupCap {
                    count: 1,
                    time: counter_caps.current_time,
                });
            }
        }

        if result.counters.is_empty() {
            return false;
        }

        for (&group, cap) in &context.counter_caps.caps {
            match counter_caps.caps.entry(group) {
                Entry::Occupied(mut seeded) => {
                    let seeded = seeded.get_mut();
                    seeded.count = seeded.count.saturating_add(cap.count);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(*cap);
                }
            }
        }

        counter_caps.evict_oldest(self.counter_cap_max_count);
        result.counter_caps = counter_caps;

        true
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(codec::to_bytes(self)?)
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, Error> {
        Self::decode(&mut bytes)
    }

    /// Reads a selector written by [`Encode::encode`], checking every
    /// condition reference.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        codec::expect_version(reader, "selector", Self::VERSION)?;

        let update_number = u64::decode(reader)?;
        let group_cap_timeout = u64::decode(reader)?;
        let group_cap_max_count = u64::decode(reader)?;
        let counter_cap_timeout = u64::decode(reader)?;
        let counter_cap_max_count = u64::decode(reader)?;
        let conditions = ConditionMap::decode(reader)?;
        let capped_groups_min_times = CapMinTimeMap::decode(reader)?;
        let pages = PageMap::decode(reader)?;

        for (&page, content) in &pages {
            if let Some(condition) = content
                .condition_ids()
                .find(|id| !conditions.contains_key(id))
            {
                return Err(Error::UnknownCondition { page, condition });
            }
        }

        let creative_weight_strategy = CreativeWeightStrategy::decode(reader)?;

        Ok(Self {
            group_cap_timeout,
            group_cap_max_count,
            counter_cap_timeout,
            counter_cap_max_count,
            update_number,
            conditions,
            capped_groups_min_times,
            pages,
            creative_weight_strategy,
            logger: discard_logger(),
        })
    }
}

impl Encode for Selector {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        Self::VERSION.encode(writer)?;
        self.update_number.encode(writer)?;
        self.group_cap_timeout.encode(writer)?;
        self.group_cap_max_count.encode(writer)?;
        self.counter_cap_timeout.encode(writer)?;
        self.counter_cap_max_count.encode(writer)?;
        self.conditions.encode(writer)?;
        self.capped_groups_min_times.encode(writer)?;
        self.pages.encode(writer)?;
        self.creative_weight_strategy.encode(writer)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "selector #{}", self.update_number)?;
        writeln!(
            f,
            "  ad caps: timeout {}s, max {}",
            self.group_cap_timeout, self.group_cap_max_count
        )?;
        writeln!(
            f,
            "  counter caps: timeout {}s, max {}",
            self.counter_cap_timeout, self.counter_cap_max_count
        )?;
        writeln!(f, "  strategy: {}", self.creative_weight_strategy)?;
        writeln!(f, "  conditions: {}", self.conditions.len())?;

        for (group, min_time) in &self.capped_groups_min_times {
            writeln!(f, "  capped group {} since {}", group, min_time)?;
        }

        for (page_id, page) in &self.pages {
            writeln!(f, "  page {} (max ads {}):", page_id, page.max_ad_num)?;

            for (advertiser, restriction) in &page.adv_restrictions {
                write!(
                    f,
                    "    advertiser {} max {}",
                    advertiser, restriction.max_ad_num
                )?;
                for pair in &restriction.adv_max_ad_nums {
                    write!(f, ", with {} max {}", pair.advertiser, pair.max_ad_num)?;
                }
                writeln!(f)?;
            }

            for (slot_id, slot) in &page.slots {
                writeln!(f, "    slot {}:", slot_id)?;

                for creative in &slot.creatives {
                    writeln!(
                        f,
                        "      creative {}: group {}{}, advertiser {}, weight {}, {}x{}, {}, conditions {:?}",
                        creative.id,
                        creative.group,
                        if creative.group_cap { " (capped)" } else { "" },
                        creative.advertiser,
                        creative.weight,
                        creative.width,
                        creative.height,
                        creative.inject,
                        creative.conditions,
                    )?;
                }
            }

            for counter in &page.counters {
                writeln!(
                    f,
                    "    counter {}: group {}{}, advertiser {}, conditions {:?}",
                    counter.id,
                    counter.group,
                    if counter.group_cap { " (capped)" } else { "" },
                    counter.advertiser,
                    counter.conditions,
                )?;
            }
        }

        Ok(())
    }
}
