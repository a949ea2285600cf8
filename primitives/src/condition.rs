//! Targeting rules.
//!
//! A [`Condition`] is evaluated against a [`SelectionContext`]. Every
//! dimension has an inclusion and an exclusion list, an empty list imposes no
//! restriction. List values may be the [`NONE`] sentinel, matching a context
//! without a value for the dimension, or the [`ANY`] sentinel, matching a
//! context with any value for it.
use crate::{
    canonical_url::normalize_url,
    codec::{self, Decode, Encode},
    context::SelectionContext,
    ip_mask::IpMask,
    locale::{Country, Lang},
    ConditionId, GroupId,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    io::{Read, Write},
    ops::{BitOr, BitOrAssign},
};

pub const NONE: &str = "[none]";
pub const ANY: &str = "[any]";

pub type ConditionMap = BTreeMap<ConditionId, Condition>;

/// Bit set of the kinds of query a page was opened with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryTypes(u64);

impl QueryTypes {
    /// A page opened without any query
    pub const NONE: Self = Self(0x1);
    pub const ANY: Self = Self(0x2);
    pub const SEARCH: Self = Self(0x4);
    pub const EVENT: Self = Self(0x8);
    pub const CATEGORY: Self = Self(0x10);
    pub const SOURCE: Self = Self(0x20);
    pub const MESSAGE: Self = Self(0x40);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for QueryTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for QueryTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Which of the visitor's cap maps a group cap is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapScope {
    Ad,
    Counter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    pub id: ConditionId,
    /// Random gate: the view passes when `rnd_mod(rnd_mod)` falls into
    /// `rnd_mod_from..=rnd_mod_to`. Disabled when zero.
    pub rnd_mod: u8,
    pub rnd_mod_from: u8,
    pub rnd_mod_to: u8,
    /// Minimal number of seconds between two shows of the group
    pub group_freq_cap: u32,
    /// Maximal number of shows of the group
    pub group_count_cap: u32,
    pub query_types: QueryTypes,
    pub query_type_exclusions: QueryTypes,
    pub message_sources: Vec<String>,
    pub message_source_exclusions: Vec<String>,
    pub page_sources: Vec<String>,
    pub page_source_exclusions: Vec<String>,
    pub message_categories: Vec<String>,
    pub message_category_exclusions: Vec<String>,
    pub page_categories: Vec<String>,
    pub page_category_exclusions: Vec<String>,
    pub search_engines: BTreeSet<String>,
    pub search_engine_exclusions: BTreeSet<String>,
    pub crawlers: BTreeSet<String>,
    pub crawler_exclusions: BTreeSet<String>,
    pub languages: BTreeSet<Lang>,
    pub language_exclusions: BTreeSet<Lang>,
    pub countries: BTreeSet<Country>,
    pub country_exclusions: BTreeSet<Country>,
    pub ip_masks: Vec<IpMask>,
    pub ip_mask_exclusions: Vec<IpMask>,
    pub tags: Vec<String>,
    pub tag_exclusions: Vec<String>,
    pub referers: Vec<String>,
    pub referer_exclusions: Vec<String>,
    pub content_languages: Vec<Lang>,
    pub content_language_exclusions: Vec<Lang>,
}

impl Condition {
    pub fn new(id: ConditionId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_random_gate(mut self, modulo: u8, from: u8, to: u8) -> Self {
        self.rnd_mod = modulo;
        self.rnd_mod_from = from;
        self.rnd_mod_to = to;
        self
    }

    pub fn with_group_caps(mut self, freq_cap: u32, count_cap: u32) -> Self {
        self.group_freq_cap = freq_cap;
        self.group_count_cap = count_cap;
        self
    }

    /// Whether the condition limits how often its groups may be shown.
    pub fn declares_group_cap(&self) -> bool {
        self.group_freq_cap != 0 || self.group_count_cap != 0
    }

    pub fn add_page_source(&mut self, url: &str) {
        add_url(&mut self.page_sources, url);
    }

    pub fn add_page_source_exclusion(&mut self, url: &str) {
        add_url(&mut self.page_source_exclusions, url);
    }

    pub fn add_message_source(&mut self, url: &str) {
        add_url(&mut self.message_sources, url);
    }

    pub fn add_message_source_exclusion(&mut self, url: &str) {
        add_url(&mut self.message_source_exclusions, url);
    }

    pub fn add_referer(&mut self, url: &str) {
        add_url(&mut self.referers, url);
    }

    pub fn add_referer_exclusion(&mut self, url: &str) {
        add_url(&mut self.referer_exclusions, url);
    }

    pub fn add_page_category(&mut self, category: &str) {
        self.page_categories.push(category.to_lowercase());
    }

    pub fn add_page_category_exclusion(&mut self, category: &str) {
        self.page_category_exclusions.push(category.to_lowercase());
    }

    pub fn add_message_category(&mut self, category: &str) {
        self.message_categories.push(category.to_lowercase());
    }

    pub fn add_message_category_exclusion(&mut self, category: &str) {
        self.message_category_exclusions.push(category.to_lowercase());
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.tags.push(tag.to_lowercase());
    }

    pub fn add_tag_exclusion(&mut self, tag: &str) {
        self.tag_exclusions.push(tag.to_lowercase());
    }

    /// Checks the page view against every dimension of the condition.
    ///
    /// `group` is the capping group of the creative or counter being matched,
    /// `scope` picks which of the visitor's cap maps applies to it.
    pub fn matches(&self, context: &SelectionContext, group: GroupId, scope: CapScope) -> bool {
        if self.rnd_mod != 0 {
            let value = context.rnd_mod(self.rnd_mod);

            if value < u32::from(self.rnd_mod_from) || value > u32::from(self.rnd_mod_to) {
                return false;
            }
        }

        if self.declares_group_cap() {
            let caps = match scope {
                CapScope::Ad => &context.ad_caps,
                CapScope::Counter => &context.counter_caps,
            };

            if let Some(cap) = caps.get(group) {
                let too_soon = self.group_freq_cap != 0
                    && caps.current_time < cap.time.saturating_add(u64::from(self.group_freq_cap));
                let too_many = self.group_count_cap != 0 && cap.count >= self.group_count_cap;

                if too_soon || too_many {
                    return false;
                }
            }
        }

        let crawler = context.crawler.as_deref();
        let is_crawler = |rule: &String| Some(rule.as_str()) == crawler;
        if !included(&self.crawlers, crawler.is_none(), is_crawler)
            || !excluded(&self.crawler_exclusions, crawler.is_none(), is_crawler)
        {
            return false;
        }

        if !single_value_matches(
            &self.languages,
            &self.language_exclusions,
            context.language.as_ref(),
        ) {
            return false;
        }

        if !list_matches(&self.tags, &self.tag_exclusions, &context.tags) {
            return false;
        }

        let content_languages = &context.content_languages;
        let has_content_lang = |rule: &Lang| content_languages.contains(rule);
        if !included(
            &self.content_languages,
            content_languages.is_empty(),
            has_content_lang,
        ) || !excluded(
            &self.content_language_exclusions,
            content_languages.is_empty(),
            has_content_lang,
        ) {
            return false;
        }

        if !self.query_types_match(context.query_types) {
            return false;
        }

        if !list_matches(&self.referers, &self.referer_exclusions, &context.referers)
            || !list_matches(
                &self.page_sources,
                &self.page_source_exclusions,
                &context.page_sources,
            )
            || !list_matches(
                &self.message_sources,
                &self.message_source_exclusions,
                &context.message_sources,
            )
            || !list_matches(
                &self.page_categories,
                &self.page_category_exclusions,
                &context.page_categories,
            )
            || !list_matches(
                &self.message_categories,
                &self.message_category_exclusions,
                &context.message_categories,
            )
        {
            return false;
        }

        let search_engine = context.search_engine.as_deref();
        let is_search_engine = |rule: &String| Some(rule.as_str()) == search_engine;
        if !included(&self.search_engines, search_engine.is_none(), is_search_engine)
            || !excluded(
                &self.search_engine_exclusions,
                search_engine.is_none(),
                is_search_engine,
            )
        {
            return false;
        }

        if !single_value_matches(
            &self.countries,
            &self.country_exclusions,
            context.country.as_ref(),
        ) {
            return false;
        }

        if !self.ip_masks.is_empty() && !self.ip_masks.iter().any(|mask| mask.matches(context.ip))
        {
            return false;
        }

        !self
            .ip_mask_exclusions
            .iter()
            .any(|mask| mask.matches(context.ip))
    }

    fn query_types_match(&self, query_types: QueryTypes) -> bool {
        let context_empty = query_types.is_empty();

        if !self.query_types.is_empty() {
            let matched = if context_empty {
                self.query_types.intersects(QueryTypes::NONE)
            } else {
                self.query_types.intersects(QueryTypes::ANY)
                    || self.query_types.intersects(query_types)
            };

            if !matched {
                return false;
            }
        }

        if self.query_type_exclusions.is_empty() {
            return true;
        }

        if context_empty {
            !self.query_type_exclusions.intersects(QueryTypes::NONE)
        } else {
            !self.query_type_exclusions.intersects(QueryTypes::ANY)
                && !self.query_type_exclusions.intersects(query_types)
        }
    }
}

fn add_url(list: &mut Vec<String>, url: &str) {
    let lowered = url.trim().to_lowercase();

    if lowered == ANY || lowered == NONE {
        list.push(lowered);
    } else if let Ok(normalized) = normalize_url(&lowered) {
        list.push(normalized);
    }
}

/// Inclusion list protocol: an empty list passes, otherwise an empty context
/// value needs [`NONE`] in the list and a present one needs [`ANY`] or a value
/// the context has.
fn included<'a, T, I, F>(rules: I, context_empty: bool, context_has: F) -> bool
where
    T: AsRef<str> + 'a,
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> bool,
{
    let mut rules = rules.into_iter().peekable();
    if rules.peek().is_none() {
        return true;
    }

    if context_empty {
        rules.any(|rule| rule.as_ref() == NONE)
    } else {
        rules.any(|rule| rule.as_ref() == ANY || context_has(rule))
    }
}

/// Exclusion list protocol, rejecting whatever the same list would include.
fn excluded<'a, T, I, F>(rules: I, context_empty: bool, context_has: F) -> bool
where
    T: AsRef<str> + 'a,
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> bool,
{
    let mut rules = rules.into_iter().peekable();
    if rules.peek().is_none() {
        return true;
    }

    !included(rules, context_empty, context_has)
}

fn list_matches(
    inclusions: &[String],
    exclusions: &[String],
    context: &std::collections::HashSet<String>,
) -> bool {
    let has = |rule: &String| context.contains(rule);

    included(inclusions, context.is_empty(), has) && excluded(exclusions, context.is_empty(), has)
}

/// Language and country are plain values: a missing context value fails a
/// non-empty inclusion list and is never excluded.
fn single_value_matches<T: Ord>(
    inclusions: &BTreeSet<T>,
    exclusions: &BTreeSet<T>,
    value: Option<&T>,
) -> bool {
    if !inclusions.is_empty() && !value.map_or(false, |value| inclusions.contains(value)) {
        return false;
    }

    !value.map_or(false, |value| exclusions.contains(value))
}

impl Encode for Condition {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.id.encode(writer)?;
        self.rnd_mod.encode(writer)?;
        self.rnd_mod_from.encode(writer)?;
        self.rnd_mod_to.encode(writer)?;
        self.group_freq_cap.encode(writer)?;
        self.group_count_cap.encode(writer)?;
        self.query_types.bits().encode(writer)?;
        self.query_type_exclusions.bits().encode(writer)?;
        self.message_sources.encode(writer)?;
        self.message_source_exclusions.encode(writer)?;
        self.page_sources.encode(writer)?;
        self.page_source_exclusions.encode(writer)?;
        self.message_categories.encode(writer)?;
        self.message_category_exclusions.encode(writer)?;
        self.page_categories.encode(writer)?;
        self.page_category_exclusions.encode(writer)?;
        self.search_engines.encode(writer)?;
        self.search_engine_exclusions.encode(writer)?;
        self.crawlers.encode(writer)?;
        self.crawler_exclusions.encode(writer)?;
        self.languages.encode(writer)?;
        self.language_exclusions.encode(writer)?;
        self.countries.encode(writer)?;
        self.country_exclusions.encode(writer)?;
        self.ip_masks.encode(writer)?;
        self.ip_mask_exclusions.encode(writer)?;
        self.tags.encode(writer)?;
        self.tag_exclusions.encode(writer)?;
        self.referers.encode(writer)?;
        self.referer_exclusions.encode(writer)?;
        self.content_languages.encode(writer)?;
        self.content_language_exclusions.encode(writer)
    }
}

impl Decode for Condition {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        Ok(Self {
            id: Decode::decode(reader)?,
            rnd_mod: Decode::decode(reader)?,
            rnd_mod_from: Decode::decode(reader)?,
            rnd_mod_to: Decode::decode(reader)?,
            group_freq_cap: Decode::decode(reader)?,
            group_count_cap: Decode::decode(reader)?,
            query_types: QueryTypes::from_bits(Decode::decode(reader)?),
            query_type_exclusions: QueryTypes::from_bits(Decode::decode(reader)?),
            message_sources: Decode::decode(reader)?,
            message_source_exclusions: Decode::decode(reader)?,
            page_sources: Decode::decode(reader)?,
            page_source_exclusions: Decode::decode(reader)?,
            message_categories: Decode::decode(reader)?,
            message_category_exclusions: Decode::decode(reader)?,
            page_categories: Decode::decode(reader)?,
            page_category_exclusions: Decode::decode(reader)?,
            search_engines: Decode::decode(reader)?,
            search_engine_exclusions: Decode::decode(reader)?,
            crawlers: Decode::decode(reader)?,
            crawler_exclusions: Decode::decode(reader)?,
            languages: Decode::decode(reader)?,
            language_exclusions: Decode::decode(reader)?,
            countries: Decode::decode(reader)?,
            country_exclusions: Decode::decode(reader)?,
            ip_masks: Decode::decode(reader)?,
            ip_mask_exclusions: Decode::decode(reader)?,
            tags: Decode::decode(reader)?,
            tag_exclusions: Decode::decode(reader)?,
            referers: Decode::decode(reader)?,
            referer_exclusions: Decode::decode(reader)?,
            content_languages: Decode::decode(reader)?,
            content_language_exclusions: Decode::decode(reader)?,
        })
    }
}
