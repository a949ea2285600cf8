use ad_selector::{CreativeWeightStrategy, Selector};
use pretty_assertions::assert_eq;
use primitives::{
    page::slot, Condition, Counter, Creative, CreativeId, GroupCap, GroupCaps, GroupId, PageKind,
    SelectionContext, SelectionResult,
};
use rand::{rngs::StdRng, SeedableRng};

const PAGE: u32 = 1;

fn selector(max_ad_num: u32) -> Selector {
    let mut selector = Selector::new(3600, 100, 3600, 100, 1);
    selector.add_standard_pages();
    selector.page_mut(PAGE).max_ad_num = max_ad_num;
    selector
}

fn select(selector: &Selector, context: &mut SelectionContext) -> SelectionResult {
    selector.select_with_rng(context, &mut StdRng::seed_from_u64(42))
}

fn selected(result: &SelectionResult) -> Vec<CreativeId> {
    let mut ids: Vec<_> = result.ads.iter().map(|ad| ad.id).collect();
    ids.sort_unstable();
    ids
}

fn two_slot_context() -> SelectionContext {
    SelectionContext::new(PAGE).with_slots([slot::DESK_PAPER_MSG1, slot::DESK_PAPER_MSG2])
}

#[test]
fn picks_the_two_heaviest_creatives() {
    let mut selector = selector(2);
    let placements = [
        (slot::DESK_PAPER_MSG1, 1, 10.0),
        (slot::DESK_PAPER_MSG1, 3, 1.0),
        (slot::DESK_PAPER_MSG2, 2, 5.0),
        (slot::DESK_PAPER_MSG2, 3, 1.0),
    ];
    for (slot, id, weight) in placements {
        selector
            .add_creative(PAGE, slot, Creative::new(id, id, id, weight))
            .expect("Should add creative");
    }
    selector.finalize();

    let result = select(&selector, &mut two_slot_context());

    assert_eq!(vec![1, 2], selected(&result));
    assert!(result.ad_caps.is_empty());
}

#[test]
fn capped_group_is_selected_once_per_call() {
    let mut selector = selector(2);
    selector.add_condition(Condition::new(1).with_group_caps(0, 10));
    selector
        .add_creative(
            PAGE,
            slot::DESK_PAPER_MSG1,
            Creative::new(1, 50, 1, 10.0).with_condition(1),
        )
        .expect("Should add creative");
    selector
        .add_creative(
            PAGE,
            slot::DESK_PAPER_MSG2,
            Creative::new(2, 50, 2, 9.0).with_condition(1),
        )
        .expect("Should add creative");
    selector.finalize();

    let result = select(&selector, &mut two_slot_context());

    assert_eq!(vec![1], selected(&result));
    assert_eq!(Some(1), result.ad_caps.get(50).map(|cap| cap.count));
}

#[test]
fn none_page_source_matches_only_without_sources() {
    let mut condition = Condition::new(1);
    condition.add_page_source("[NONE]");

    let mut selector = selector(1);
    selector.add_condition(condition);
    selector
        .add_creative(
            PAGE,
            slot::DESK_PAPER_MSG1,
            Creative::new(1, 1, 1, 1.0).with_condition(1),
        )
        .expect("Should add creative");
    selector.finalize();

    let mut context = SelectionContext::new(PAGE).with_slots([slot::DESK_PAPER_MSG1]);
    assert_eq!(vec![1], selected(&select(&selector, &mut context)));

    context.add_page_source("http://www.example.com/news/today");
    assert!(select(&selector, &mut context).ads.is_empty());
}

#[test]
fn count_cap_carries_over_to_the_next_call() {
    let mut selector = selector(1);
    selector.add_condition(Condition::new(1).with_group_caps(0, 1));
    selector
        .add_creative(
            PAGE,
            slot::DESK_PAPER_MSG1,
            Creative::new(1, 70, 1, 10.0).with_condition(1),
        )
        .expect("Should add creative");
    selector
        .add_creative(PAGE, slot::DESK_PAPER_MSG1, Creative::new(2, 71, 2, 1.0))
        .expect("Should add creative");
    selector.finalize();

    let mut first = SelectionContext::new(PAGE).with_slots([slot::DESK_PAPER_MSG1]);
    let first_result = select(&selector, &mut first);
    assert_eq!(vec![1], selected(&first_result));

    let token = first_result
        .ad_caps
        .to_token()
        .expect("Should encode caps");

    let mut second = SelectionContext::new(PAGE).with_slots([slot::DESK_PAPER_MSG1]);
    second.load_caps(Some(&token), None);
    assert_eq!(first_result.ad_caps.caps, second.ad_caps.caps);

    let second_result = select(&selector, &mut second);
    assert_eq!(vec![2], selected(&second_result));
    assert_eq!(Some(1), second_result.ad_caps.get(70).map(|cap| cap.count));
}

#[test]
fn advertiser_restrictions_hold_across_slots() {
    let mut selector = selector(3);
    let page = selector.page_mut(PAGE);
    page.add_max_ad_num(1, 1);
    page.add_pair_max_ad_num(1, 2, 1);

    let slots = [
        slot::DESK_PAPER_MSG1,
        slot::DESK_PAPER_MSG2,
        slot::DESK_PAPER_MSA1,
    ];
    let mut id = 0;
    for slot in slots {
        for (advertiser, weight) in [(1, 8.0), (2, 6.0), (3, 1.0)] {
            id += 1;
            selector
                .add_creative(PAGE, slot, Creative::new(id, id, advertiser, weight))
                .expect("Should add creative");
        }
    }
    selector.finalize();

    let mut context = SelectionContext::new(PAGE).with_slots(slots);
    let result = select(&selector, &mut context);

    let advertisers: Vec<_> = result
        .ads
        .iter()
        .map(|ad| (ad.id - 1) % 3 + 1)
        .collect();
    assert_eq!(3, result.ads.len());
    assert_eq!(
        1,
        advertisers.iter().filter(|&&adv| adv == 1 || adv == 2).count()
    );
}

#[test]
fn probabilistic_selection_is_reproducible() {
    let mut selector = selector(1).with_strategy(CreativeWeightStrategy::probabilistic());
    for id in 1..=20 {
        selector
            .add_creative(
                PAGE,
                slot::DESK_PAPER_MSG1,
                Creative::new(id, id, id, f64::from(id as u32)),
            )
            .expect("Should add creative");
    }
    selector.finalize();

    let context = SelectionContext::new(PAGE).with_slots([slot::DESK_PAPER_MSG1]);
    let first = select(&selector, &mut context.clone());
    let second = select(&selector, &mut context.clone());

    assert_eq!(1, first.ads.len());
    assert_eq!(first.ads, second.ads);
}

#[test]
fn binary_snapshot_serves_the_same_selection() {
    let mut selector = selector(2);
    selector.add_condition(Condition::new(1).with_group_caps(60, 0));
    for (id, weight) in [(1, 3.0), (2, 2.0)] {
        selector
            .add_creative(
                PAGE,
                slot::DESK_PAPER_MSG1,
                Creative::new(id, id, id, weight).with_condition(1),
            )
            .expect("Should add creative");
    }
    selector.finalize();

    let bytes = selector.to_bytes().expect("Should encode selector");
    let decoded = Selector::from_bytes(&bytes).expect("Should decode selector");

    assert_eq!(selector.pages.keys().collect::<Vec<_>>(), vec![&PageKind::DeskPaper.id()]);

    let context = SelectionContext::new(PAGE).with_slots([slot::DESK_PAPER_MSG1]);
    assert_eq!(
        select(&selector, &mut context.clone()),
        select(&decoded, &mut context.clone())
    );
}

fn cap_groups(caps: &GroupCaps) -> Vec<GroupId> {
    caps.caps.keys().copied().collect()
}

#[test]
fn ad_caps_are_bounded_by_the_max_count() {
    let mut selector = Selector::new(3600, 2, 3600, 100, 1);
    selector.add_standard_pages();
    selector.page_mut(PAGE).max_ad_num = 1;
    selector.add_condition(Condition::new(1).with_group_caps(0, 5));
    selector
        .add_creative(
            PAGE,
            slot::DESK_PAPER_MSG1,
            Creative::new(1, 70, 1, 1.0).with_condition(1),
        )
        .expect("Should add creative");
    selector.finalize();

    let mut context = SelectionContext::new(PAGE).with_slots([slot::DESK_PAPER_MSG1]);
    let now = context.current_time();
    for (group, age) in [(100, 300), (101, 300), (102, 200)] {
        context.ad_caps.caps.insert(
            group,
            GroupCap {
                count: 1,
                time: now - age,
            },
        );
    }

    let result = select(&selector, &mut context);

    assert_eq!(vec![1], selected(&result));
    assert!(result.ad_caps.len() <= 2);
    // both caps tied at the oldest time go, the fresh one stays
    assert_eq!(vec![70, 102], cap_groups(&result.ad_caps));
    assert_eq!(
        Some(&GroupCap { count: 1, time: now }),
        result.ad_caps.get(70)
    );
}

#[test]
fn counter_caps_are_bounded_by_the_max_count() {
    let mut selector = Selector::new(3600, 100, 3600, 2, 1);
    selector.add_standard_pages();
    selector.add_condition(Condition::new(1).with_group_caps(0, 5));
    selector
        .add_counter(PAGE, Counter::new(1, 30, 1).with_condition(1))
        .expect("Should add counter");
    selector.finalize();

    let mut context = SelectionContext::new(PAGE);
    let now = context.current_time();
    for (group, count, age) in [(200, 1, 300), (201, 1, 300), (202, 2, 100)] {
        context.counter_caps.caps.insert(
            group,
            GroupCap {
                count,
                time: now - age,
            },
        );
    }

    let result = select(&selector, &mut context);

    assert_eq!(1, result.counters.len());
    assert!(result.counter_caps.len() <= 2);
    assert_eq!(vec![30, 202], cap_groups(&result.counter_caps));
    assert_eq!(
        Some(&GroupCap { count: 1, time: now }),
        result.counter_caps.get(30)
    );
}
