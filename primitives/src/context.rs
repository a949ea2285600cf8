use crate::{
    canonical_url::{normalize_url, url_prefixes},
    caps::{unix_now, GroupCaps},
    condition::QueryTypes,
    locale::{Country, Lang},
    PageId, SlotId,
};
use rand::Rng;
use std::{collections::HashSet, net::Ipv4Addr};

/// Largest value of [`SelectionContext::rnd`].
pub const RAND_MAX: u32 = 0x7FFF_FFFF;

/// Everything known about a single page view.
///
/// The order of [`SelectionContext::slots`] is the order in which slots are
/// filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionContext {
    pub page: PageId,
    pub slots: Vec<SlotId>,
    pub page_sources: HashSet<String>,
    pub message_sources: HashSet<String>,
    pub page_categories: HashSet<String>,
    pub message_categories: HashSet<String>,
    pub search_engine: Option<String>,
    pub crawler: Option<String>,
    /// Pre-rolled random value in `0..=RAND_MAX`
    pub rnd: u32,
    pub language: Option<Lang>,
    pub country: Option<Country>,
    pub content_languages: HashSet<Lang>,
    pub ip: u32,
    pub ad_caps: GroupCaps,
    pub counter_caps: GroupCaps,
    pub tags: HashSet<String>,
    pub referers: HashSet<String>,
    pub query_types: QueryTypes,
}

impl SelectionContext {
    pub fn new(page: PageId) -> Self {
        Self::at(page, unix_now())
    }

    /// Context for a page view happening at `current_time`.
    pub fn at(page: PageId, current_time: u64) -> Self {
        Self {
            page,
            ad_caps: GroupCaps::new(current_time),
            counter_caps: GroupCaps::new(current_time),
            ..Self::default()
        }
    }

    pub fn with_slots(mut self, slots: impl IntoIterator<Item = SlotId>) -> Self {
        self.slots.extend(slots);
        self
    }

    pub fn current_time(&self) -> u64 {
        self.ad_caps.current_time
    }

    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.rnd = rng.gen_range(0..=RAND_MAX);
    }

    /// Maps the pre-rolled random value onto `0..modulo`.
    pub fn rnd_mod(&self, modulo: u8) -> u32 {
        let scaled = u64::from(self.rnd) * u64::from(modulo) / (u64::from(RAND_MAX) + 1);
        scaled as u32
    }

    /// Restores the caps carried by the caller.
    ///
    /// Tokens that fail to decode count as no caps. The context keeps its own
    /// current time.
    pub fn load_caps(&mut self, ad_token: Option<&str>, counter_token: Option<&str>) {
        let current_time = self.current_time();

        if let Some(token) = ad_token {
            self.ad_caps = GroupCaps::from_token(token);
        }
        if let Some(token) = counter_token {
            self.counter_caps = GroupCaps::from_token(token);
        }

        self.ad_caps.current_time = current_time;
        self.counter_caps.current_time = current_time;
    }

    pub fn set_ip(&mut self, ip: Ipv4Addr) {
        self.ip = u32::from(ip);
    }

    pub fn add_page_source(&mut self, url: &str) {
        if !url.is_empty() {
            add_url(&mut self.page_sources, url);
        }
    }

    pub fn add_message_source(&mut self, url: &str) {
        if !url.is_empty() {
            add_url(&mut self.message_sources, url);
        }
    }

    pub fn set_referer(&mut self, url: &str) {
        self.referers.clear();
        add_url(&mut self.referers, url);
    }

    pub fn add_page_category(&mut self, category: &str) {
        if !category.is_empty() {
            self.query_types |= QueryTypes::CATEGORY;
            add_category(&mut self.page_categories, category);
        }
    }

    pub fn add_message_category(&mut self, category: &str) {
        add_category(&mut self.message_categories, category);
    }

    /// Adds the tag as given. Condition tags are lower-cased when registered,
    /// so callers must lower-case tags before adding them.
    pub fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    pub fn add_content_lang(&mut self, lang: Lang) {
        self.content_languages.insert(lang);
    }
}

fn add_url(set: &mut HashSet<String>, url: &str) {
    // Unparsable urls simply don't take part in targeting
    if let Ok(normalized) = normalize_url(url) {
        set.extend(url_prefixes(&normalized));
    }
}

/// Inserts every `/`-terminated prefix of the category path.
fn add_category(set: &mut HashSet<String>, category: &str) {
    let category = category.to_lowercase();

    for (pos, _) in category.match_indices('/') {
        set.insert(category[..=pos].to_string());
    }
}
