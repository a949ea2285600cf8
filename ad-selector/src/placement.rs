//! Best placement search.
//!
//! Depth-first search over the requested slots choosing at most one creative
//! per slot. The total weight of the placement is maximized while
//! respecting group caps and advertiser restrictions of the page.
use crate::strategy::CreativeWeight;
use primitives::{AdvRestrictionMap, AdvertiserId, Creative, GroupId, SlotId};
use std::{
    collections::{HashMap, HashSet},
    ops::{Deref, DerefMut},
};

/// Placements within this weight of each other are equally good, the one
/// using fewer slots wins.
pub const WEIGHT_TIE_EPSILON: f64 = 0.01;

/// A requested slot with the creatives eligible for it, in priority order.
#[derive(Debug, Clone)]
pub struct SelectedSlot<'a> {
    pub id: SlotId,
    pub creatives: Vec<CreativeWeight<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub slot: SlotId,
    pub creative: &'a Creative,
}

/// State of one search, the best placement found so far included.
#[derive(Debug, Default)]
pub struct TraversalContext<'a> {
    pub best: Vec<Placement<'a>>,
    pub best_weight: f64,
    current: Vec<Placement<'a>>,
    current_weight: f64,
    adv_counters: HashMap<AdvertiserId, u32>,
    group_capped: HashSet<GroupId>,
}

impl<'a> TraversalContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_better(&self) -> bool {
        self.best_weight < self.current_weight
            || (self.best_weight - self.current_weight < WEIGHT_TIE_EPSILON
                && self.best.len() > self.current.len())
    }

    /// Whether the advertiser may place one more ad, counting it when so.
    fn count_advertiser(
        &mut self,
        advertiser: AdvertiserId,
        restrictions: &AdvRestrictionMap,
    ) -> Option<bool> {
        let restriction = match restrictions.get(&advertiser) {
            Some(restriction) => restriction,
            None => return Some(false),
        };

        let placed = self.adv_counters.get(&advertiser).copied().unwrap_or(0);
        if placed >= restriction.max_ad_num {
            return None;
        }

        let pair_exceeded = restriction.adv_max_ad_nums.iter().any(|pair| {
            let other = self
                .adv_counters
                .get(&pair.advertiser)
                .copied()
                .unwrap_or(0);
            other.saturating_add(placed) >= pair.max_ad_num
        });
        if pair_exceeded {
            return None;
        }

        *self.adv_counters.entry(advertiser).or_insert(0) += 1;
        Some(true)
    }
}

/// A placement tried on top of the current one, undone when dropped.
struct Tentative<'c, 'a> {
    context: &'c mut TraversalContext<'a>,
    previous_weight: f64,
    advertiser: Option<AdvertiserId>,
    group: Option<GroupId>,
}

impl<'c, 'a> Tentative<'c, 'a> {
    fn place(
        context: &'c mut TraversalContext<'a>,
        slot: SlotId,
        candidate: &CreativeWeight<'a>,
        counted: bool,
    ) -> Self {
        let creative = candidate.creative;
        let previous_weight = context.current_weight;

        let group = if creative.group_cap {
            context.group_capped.insert(creative.group);
            Some(creative.group)
        } else {
            None
        };

        context.current_weight += candidate.weight;
        context.current.push(Placement { slot, creative });

        Self {
            context,
            previous_weight,
            advertiser: counted.then_some(creative.advertiser),
            group,
        }
    }
}

impl<'a> Deref for Tentative<'_, 'a> {
    type Target = TraversalContext<'a>;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl<'a> DerefMut for Tentative<'_, 'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl Drop for Tentative<'_, '_> {
    fn drop(&mut self) {
        if let Some(advertiser) = self.advertiser {
            if let Some(placed) = self.context.adv_counters.get_mut(&advertiser) {
                *placed -= 1;
            }
        }

        if let Some(group) = self.group {
            self.context.group_capped.remove(&group);
        }

        self.context.current.pop();
        self.context.current_weight = self.previous_weight;
    }
}

/// Tries every candidate of the first slot of `slots` and, while `level`
/// allows more ads, every continuation in the slots after it.
pub fn select_best_placement<'a>(
    slots: &[SelectedSlot<'a>],
    restrictions: &AdvRestrictionMap,
    level: u32,
    context: &mut TraversalContext<'a>,
) {
    let (slot, rest) = match slots.split_first() {
        Some(split) => split,
        None => return,
    };

    for candidate in &slot.creatives {
        let creative = candidate.creative;

        if creative.group_cap && context.group_capped.contains(&creative.group) {
            continue;
        }

        let counted = match context.count_advertiser(creative.advertiser, restrictions) {
            Some(counted) => counted,
            None => continue,
        };

        let mut tentative = Tentative::place(context, slot.id, candidate, counted);

        if tentative.is_better() {
            tentative.best = tentative.current.clone();
            tentative.best_weight = tentative.current_weight;
        }

        if level > 1 {
            for next in 0..rest.len() {
                select_best_placement(&rest[next..], restrictions, level - 1, &mut tentative);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use primitives::Page;

    fn slot<'a>(id: SlotId, creatives: &[&'a Creative]) -> SelectedSlot<'a> {
        SelectedSlot {
            id,
            creatives: creatives.iter().map(|&c| CreativeWeight::new(c)).collect(),
        }
    }

    fn search<'a>(
        slots: &[SelectedSlot<'a>],
        restrictions: &AdvRestrictionMap,
        max_ad_num: u32,
    ) -> TraversalContext<'a> {
        let mut context = TraversalContext::new();
        for first in 0..slots.len() {
            select_best_placement(&slots[first..], restrictions, max_ad_num, &mut context);
        }
        context
    }

    fn chosen(context: &TraversalContext<'_>) -> Vec<(SlotId, u64)> {
        context
            .best
            .iter()
            .map(|placement| (placement.slot, placement.creative.id))
            .collect()
    }

    #[test]
    fn picks_the_heaviest_combination() {
        let heavy = Creative::new(1, 1, 1, 10.0);
        let medium = Creative::new(2, 2, 2, 5.0);
        let light = Creative::new(3, 3, 3, 1.0);

        let slots = [slot(1, &[&heavy, &light]), slot(2, &[&medium, &light])];
        let context = search(&slots, &AdvRestrictionMap::new(), 2);

        assert_eq!(vec![(1, 1), (2, 2)], chosen(&context));
        assert_eq!(15.0, context.best_weight);
    }

    #[test]
    fn depth_is_bounded_by_max_ad_num() {
        let a = Creative::new(1, 1, 1, 1.0);
        let b = Creative::new(2, 2, 2, 3.0);
        let c = Creative::new(3, 3, 3, 2.0);

        let slots = [slot(1, &[&a]), slot(2, &[&b]), slot(3, &[&c])];
        let context = search(&slots, &AdvRestrictionMap::new(), 2);

        assert_eq!(vec![(2, 2), (3, 3)], chosen(&context));
    }

    #[test]
    fn capped_group_is_placed_once() {
        let mut first = Creative::new(1, 7, 1, 4.0);
        first.group_cap = true;
        let mut second = Creative::new(2, 7, 2, 3.0);
        second.group_cap = true;
        let other = Creative::new(3, 8, 3, 1.0);

        let slots = [slot(1, &[&first, &second]), slot(2, &[&second, &other])];
        let context = search(&slots, &AdvRestrictionMap::new(), 2);

        assert_eq!(vec![(1, 1), (2, 3)], chosen(&context));
    }

    #[test]
    fn uncapped_group_may_repeat() {
        let first = Creative::new(1, 7, 1, 4.0);
        let second = Creative::new(2, 7, 2, 3.0);

        let slots = [slot(1, &[&first]), slot(2, &[&second])];
        let context = search(&slots, &AdvRestrictionMap::new(), 2);

        assert_eq!(vec![(1, 1), (2, 2)], chosen(&context));
    }

    #[test]
    fn advertiser_limits() {
        let a1 = Creative::new(1, 1, 100, 5.0);
        let a2 = Creative::new(2, 2, 100, 5.0);
        let b1 = Creative::new(3, 3, 200, 4.0);
        let c1 = Creative::new(4, 4, 300, 1.0);

        let mut page = Page::default();
        page.add_max_ad_num(100, 1);
        page.add_pair_max_ad_num(100, 200, 1);

        let slots = [
            slot(1, &[&a1, &b1, &c1]),
            slot(2, &[&a2, &b1, &c1]),
            slot(3, &[&c1]),
        ];
        let context = search(&slots, &page.adv_restrictions, 3);

        let best = chosen(&context);
        let advertiser_100 = context
            .best
            .iter()
            .filter(|placement| placement.creative.advertiser == 100)
            .count();
        let pair = context
            .best
            .iter()
            .filter(|placement| [100, 200].contains(&placement.creative.advertiser))
            .count();

        assert!(advertiser_100 <= 1, "{:?}", best);
        assert!(pair <= 1, "{:?}", best);
        assert_eq!(7.0, context.best_weight);
    }

    #[test]
    fn advertiser_without_quota_is_skipped() {
        let banned = Creative::new(1, 1, 100, 50.0);
        let allowed = Creative::new(2, 2, 200, 1.0);

        let mut page = Page::default();
        page.add_max_ad_num(100, 0);

        let slots = [slot(1, &[&banned, &allowed])];
        let context = search(&slots, &page.adv_restrictions, 1);

        assert_eq!(vec![(1, 2)], chosen(&context));
    }

    #[test]
    fn ties_prefer_fewer_placements() {
        let x = Creative::new(1, 1, 1, 3.0);
        let y = Creative::new(2, 2, 2, 2.0);
        let z = Creative::new(3, 3, 3, 5.0);

        let mut page = Page::default();
        page.add_pair_max_ad_num(1, 3, 1);
        page.add_pair_max_ad_num(2, 3, 1);

        // x + y is found first, z alone weighs the same
        let slots = [slot(1, &[&x]), slot(2, &[&y]), slot(3, &[&z])];
        let context = search(&slots, &page.adv_restrictions, 2);

        assert_eq!(vec![(3, 3)], chosen(&context));
        assert_eq!(5.0, context.best_weight);
    }

    #[test]
    fn strictly_heavier_placement_wins_even_when_longer() {
        let big = Creative::new(1, 1, 1, 10.0);
        let tiny = Creative::new(2, 2, 2, 0.005);

        let slots = [slot(1, &[&big]), slot(2, &[&tiny])];
        let context = search(&slots, &AdvRestrictionMap::new(), 2);

        assert_eq!(vec![(1, 1), (2, 2)], chosen(&context));
    }

    #[test]
    fn search_leaves_no_trace() {
        let mut capped = Creative::new(1, 5, 100, 2.0);
        capped.group_cap = true;
        let mut page = Page::default();
        page.add_max_ad_num(100, 2);

        let slots = [slot(1, &[&capped]), slot(2, &[&capped])];
        let context = search(&slots, &page.adv_restrictions, 2);

        assert!(context.current.is_empty());
        assert_eq!(0.0, context.current_weight);
        assert!(context.group_capped.is_empty());
        assert_eq!(Some(&0), context.adv_counters.get(&100));
    }
}
