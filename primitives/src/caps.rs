//! Per-visitor capping state.
//!
//! The engine never stores capping state itself: [`GroupCaps`] travel with the
//! caller as an opaque base64 token and come back with the next request.
use crate::{
    codec::{self, Decode, Encode},
    GroupId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::{Read, Write},
};
use thiserror::Error;

pub type GroupCapMap = BTreeMap<GroupId, GroupCap>;

/// Groups whose caps must be kept regardless of the cap timeout, together with
/// the oldest cap time still honoured for each of them.
pub type CapMinTimeMap = BTreeMap<GroupId, u64>;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Decoding base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decoding caps: {0}")]
    Codec(#[from] codec::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCap {
    pub count: u32,
    /// Last time a member of the group was shown
    pub time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCaps {
    pub caps: GroupCapMap,
    pub current_time: u64,
}

impl GroupCaps {
    pub const VERSION: u32 = 1;

    pub fn new(current_time: u64) -> Self {
        Self {
            caps: GroupCapMap::new(),
            current_time,
        }
    }

    pub fn set_current_time(&mut self) {
        self.current_time = unix_now();
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    pub fn get(&self, group: GroupId) -> Option<&GroupCap> {
        self.caps.get(&group)
    }

    /// Records one more use of `group` at `current_time`.
    pub fn bump(&mut self, group: GroupId) {
        let cap = self.caps.entry(group).or_default();
        cap.time = self.current_time;
        cap.count = cap.count.saturating_add(1);
    }

    /// Drops caps that are no longer honoured.
    ///
    /// A group listed in `min_times` keeps its cap until the cap predates the
    /// group's minimum time; any other group loses it once it is older than
    /// `timeout` seconds.
    pub fn cleanup(&mut self, timeout: u64, min_times: &CapMinTimeMap) {
        let expiration = self.current_time.saturating_sub(timeout);

        self.caps
            .retain(|group, cap| match min_times.get(group) {
                Some(min_time) => cap.time >= *min_time,
                None => cap.time > expiration,
            });
    }

    /// Evicts the oldest caps until at most `max_count` remain.
    ///
    /// Every cap sharing the oldest time is evicted together, so the map can
    /// end up below `max_count`.
    pub fn evict_oldest(&mut self, max_count: u64) {
        while self.caps.len() as u64 > max_count {
            let oldest = match self.caps.values().map(|cap| cap.time).min() {
                Some(oldest) => oldest,
                None => break,
            };

            self.caps.retain(|_, cap| cap.time != oldest);
        }
    }

    /// Writes the caps with times stored as deltas from `max(now, current_time)`.
    pub fn encode_at<W: Write>(&self, writer: &mut W, now: u64) -> Result<(), codec::Error> {
        let base = now.max(self.current_time);

        Self::VERSION.encode(writer)?;
        self.current_time.encode(writer)?;
        base.encode(writer)?;
        codec::write_len(writer, self.caps.len())?;

        for (group, cap) in &self.caps {
            let delta = u32::try_from(base.saturating_sub(cap.time)).unwrap_or(u32::MAX);

            group.encode(writer)?;
            delta.encode(writer)?;
            cap.count.encode(writer)?;
        }

        Ok(())
    }

    pub fn to_token(&self) -> Result<String, codec::Error> {
        Ok(base64::encode(codec::to_bytes(self)?))
    }

    pub fn try_from_token(token: &str) -> Result<Self, TokenError> {
        let bytes = base64::decode(token.trim())?;

        Ok(codec::from_bytes(&bytes)?)
    }

    /// Decodes a token, treating anything undecodable as no caps at all.
    pub fn from_token(token: &str) -> Self {
        Self::try_from_token(token).unwrap_or_default()
    }
}

impl Encode for GroupCaps {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.encode_at(writer, unix_now())
    }
}

impl Decode for GroupCaps {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        codec::expect_version(reader, "group caps", Self::VERSION)?;

        let current_time = u64::decode(reader)?;
        let base = u64::decode(reader)?;
        let len = codec::read_len(reader)?;

        let mut caps = GroupCapMap::new();
        for _ in 0..len {
            let group = GroupId::decode(reader)?;
            let delta = u32::decode(reader)?;
            let count = u32::decode(reader)?;

            caps.insert(
                group,
                GroupCap {
                    count,
                    time: base.saturating_sub(u64::from(delta)),
                },
            );
        }

        Ok(Self { caps, current_time })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn caps(current_time: u64, entries: &[(GroupId, u32, u64)]) -> GroupCaps {
        GroupCaps {
            caps: entries
                .iter()
                .map(|&(group, count, time)| (group, GroupCap { count, time }))
                .collect(),
            current_time,
        }
    }

    #[test]
    fn token_keeps_counts_and_times() {
        let original = caps(1_000, &[(1, 3, 900), (2, 1, 1_000), (42, 7, 10)]);

        let token = original.to_token().expect("Should encode");
        let decoded = GroupCaps::try_from_token(&token).expect("Should decode");

        assert_eq!(original, decoded);
    }

    #[test]
    fn times_are_relative_to_the_later_of_now_and_current_time() {
        let original = caps(500, &[(1, 1, 450)]);

        let mut bytes = Vec::new();
        original.encode_at(&mut bytes, 2_000).expect("Should encode");
        let decoded: GroupCaps = codec::from_bytes(&bytes).expect("Should decode");

        assert_eq!(500, decoded.current_time);
        assert_eq!(Some(&GroupCap { count: 1, time: 450 }), decoded.get(1));

        // A stale clock never produces negative deltas
        let mut bytes = Vec::new();
        original.encode_at(&mut bytes, 10).expect("Should encode");
        let decoded: GroupCaps = codec::from_bytes(&bytes).expect("Should decode");
        assert_eq!(original, decoded);
    }

    #[test]
    fn garbage_tokens_fail_open() {
        assert!(GroupCaps::try_from_token("not base64!").is_err());
        assert_eq!(GroupCaps::default(), GroupCaps::from_token("not base64!"));

        let truncated = base64::encode([0_u8, 0, 0, 1, 0, 0]);
        assert!(matches!(
            GroupCaps::try_from_token(&truncated),
            Err(TokenError::Codec(_))
        ));
        assert!(GroupCaps::from_token(&truncated).is_empty());
    }

    #[test]
    fn cleanup_honours_timeout_and_min_times() {
        let mut group_caps = caps(1_000, &[(1, 1, 100), (2, 1, 950), (3, 1, 100), (4, 1, 990)]);
        let min_times: CapMinTimeMap = vec![(3, 50), (4, 995)].into_iter().collect();

        group_caps.cleanup(100, &min_times);

        // 1 timed out, 3 is pinned, 4 predates its minimum time
        assert_eq!(vec![2, 3], group_caps.caps.keys().copied().collect::<Vec<_>>());
    }

    #[test]
    fn eviction_removes_every_oldest_entry() {
        let mut group_caps = caps(1_000, &[(1, 1, 10), (2, 1, 10), (3, 1, 20), (4, 1, 30)]);

        group_caps.evict_oldest(3);

        assert_eq!(vec![3, 4], group_caps.caps.keys().copied().collect::<Vec<_>>());
    }

    #[test]
    fn eviction_always_reaches_the_bound() {
        let entries: Vec<(GroupId, u32, u64)> = (0..50)
            .map(|group| (group, 1, 1_000 + group))
            .collect();
        let mut group_caps = caps(2_000, &entries);

        group_caps.evict_oldest(10);

        assert_eq!(10, group_caps.len());
        assert_eq!(Some(&40), group_caps.caps.keys().next());
    }

    #[test]
    fn bump_sets_time_and_increments() {
        let mut group_caps = caps(1_000, &[(1, 2, 10)]);

        group_caps.bump(1);
        group_caps.bump(2);

        assert_eq!(Some(&GroupCap { count: 3, time: 1_000 }), group_caps.get(1));
        assert_eq!(Some(&GroupCap { count: 1, time: 1_000 }), group_caps.get(2));
    }
}
