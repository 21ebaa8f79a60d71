//! Dual identifier scheme for delineated units.
//!
//! Topaz ids carry topology in their last digit (1 center, 2 right, 3 left
//! hillslope, 4 channel). WEPP ids are consecutive: hillslopes sorted by topaz
//! ascending take `1..=H`, channels sorted by topaz descending take
//! `H+1..=H+C`. The channel enumeration is `wepp - H`.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    CenterHillslope,
    RightHillslope,
    LeftHillslope,
    Channel,
}

impl UnitKind {
    pub fn of(topaz_id: i32) -> Option<UnitKind> {
        match topaz_id.rem_euclid(10) {
            1 => Some(UnitKind::CenterHillslope),
            2 => Some(UnitKind::RightHillslope),
            3 => Some(UnitKind::LeftHillslope),
            4 => Some(UnitKind::Channel),
            _ => None,
        }
    }
}

pub fn is_channel_topaz(topaz_id: i32) -> bool {
    topaz_id.rem_euclid(10) == 4
}

pub fn is_hillslope_topaz(topaz_id: i32) -> bool {
    matches!(topaz_id.rem_euclid(10), 1..=3)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translator {
    hillslopes: Vec<i32>,
    channels: Vec<i32>,
    top2wepp: BTreeMap<i32, i32>,
    wepp2top: BTreeMap<i32, i32>,
}

impl Translator {
    pub fn new(
        hillslopes: impl IntoIterator<Item = i32>,
        channels: impl IntoIterator<Item = i32>,
    ) -> Result<Self> {
        let mut hillslopes: Vec<i32> = hillslopes.into_iter().collect();
        let mut channels: Vec<i32> = channels.into_iter().collect();
        hillslopes.sort_unstable();
        hillslopes.dedup();
        channels.sort_unstable_by(|a, b| b.cmp(a));
        channels.dedup();

        if let Some(bad) = hillslopes.iter().find(|id| !is_hillslope_topaz(**id)) {
            return Err(Error::validation(format!(
                "topaz id {} is registered as a hillslope but does not end in 1, 2 or 3",
                bad
            )));
        }
        if let Some(bad) = channels.iter().find(|id| !is_channel_topaz(**id)) {
            return Err(Error::validation(format!(
                "topaz id {} is registered as a channel but does not end in 4",
                bad
            )));
        }

        let mut top2wepp = BTreeMap::new();
        let mut wepp2top = BTreeMap::new();
        for (i, topaz) in hillslopes.iter().chain(channels.iter()).enumerate() {
            let wepp = i as i32 + 1;
            top2wepp.insert(*topaz, wepp);
            wepp2top.insert(wepp, *topaz);
        }

        Ok(Translator {
            hillslopes,
            channels,
            top2wepp,
            wepp2top,
        })
    }

    pub fn hillslope_count(&self) -> usize {
        self.hillslopes.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn wepp(&self, topaz_id: i32) -> Option<i32> {
        self.top2wepp.get(&topaz_id).copied()
    }

    pub fn top(&self, wepp_id: i32) -> Option<i32> {
        self.wepp2top.get(&wepp_id).copied()
    }

    /// Channel enumeration of a channel, given its WEPP id.
    pub fn chn_enum(&self, wepp_id: i32) -> Option<i32> {
        let h = self.hillslopes.len() as i32;
        if wepp_id > h && self.wepp2top.contains_key(&wepp_id) {
            Some(wepp_id - h)
        } else {
            None
        }
    }

    pub fn chn_enum_of_topaz(&self, topaz_id: i32) -> Option<i32> {
        self.wepp(topaz_id).and_then(|w| self.chn_enum(w))
    }

    pub fn topaz_of_chn_enum(&self, chn_enum: i32) -> Option<i32> {
        if chn_enum < 1 {
            return None;
        }
        self.top(chn_enum + self.hillslopes.len() as i32)
    }

    /// True when `topaz_id` is a registered channel. The last-digit test and the
    /// WEPP range test must agree for registered units.
    pub fn is_channel(&self, topaz_id: i32) -> bool {
        match self.wepp(topaz_id) {
            Some(w) => w > self.hillslopes.len() as i32,
            None => false,
        }
    }

    pub fn contains(&self, topaz_id: i32) -> bool {
        self.top2wepp.contains_key(&topaz_id)
    }

    /// Hillslopes ascending by topaz id (equivalently ascending WEPP id).
    pub fn iter_hillslopes(&self) -> impl Iterator<Item = i32> + '_ {
        self.hillslopes.iter().copied()
    }

    /// Channels in channel-enumeration order (topaz descending).
    pub fn iter_channels(&self) -> impl Iterator<Item = i32> + '_ {
        self.channels.iter().copied()
    }

    /// Registered uplands of a channel in (right, left, center) order.
    pub fn channel_hillslopes(&self, chn_topaz: i32) -> Vec<i32> {
        [chn_topaz - 2, chn_topaz - 1, chn_topaz - 3]
            .into_iter()
            .filter(|id| self.contains(*id) && !self.is_channel(*id))
            .collect()
    }

    /// (right, left, center) WEPP ids for a channel; missing uplands are 0.
    pub fn upland_wepp_ids(&self, chn_topaz: i32) -> [i32; 3] {
        let lookup = |id: i32| -> i32 {
            if self.contains(id) && !self.is_channel(id) {
                self.wepp(id).unwrap_or(0)
            } else {
                0
            }
        };
        [
            lookup(chn_topaz - 2),
            lookup(chn_topaz - 1),
            lookup(chn_topaz - 3),
        ]
    }

    pub fn channel_of_hillslope(&self, hill_topaz: i32) -> Option<i32> {
        let chn = hill_topaz - hill_topaz.rem_euclid(10) + 4;
        if self.is_channel(chn) { Some(chn) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Translator {
        Translator::new([11, 12, 13, 21, 22, 23], [14, 24]).unwrap()
    }

    #[test]
    fn test_wepp_ids_follow_sort_order() {
        let t = tiny();
        let expected = [(11, 1), (12, 2), (13, 3), (21, 4), (22, 5), (23, 6), (24, 7), (14, 8)];
        for (topaz, wepp) in expected {
            assert_eq!(t.wepp(topaz), Some(wepp), "topaz {}", topaz);
            assert_eq!(t.top(wepp), Some(topaz));
        }
        assert_eq!(t.chn_enum(7), Some(1));
        assert_eq!(t.chn_enum(8), Some(2));
        assert_eq!(t.chn_enum(6), None);
        assert_eq!(t.topaz_of_chn_enum(2), Some(14));
    }

    #[test]
    fn test_channel_hillslopes_right_left_center() {
        let t = tiny();
        assert_eq!(t.channel_hillslopes(14), vec![12, 13, 11]);
        assert_eq!(t.upland_wepp_ids(24), [5, 6, 4]);
    }

    #[test]
    fn test_missing_uplands_are_skipped() {
        let t = Translator::new([22, 23], [24]).unwrap();
        assert_eq!(t.channel_hillslopes(24), vec![22, 23]);
        assert_eq!(t.upland_wepp_ids(24), [1, 2, 0]);
    }

    #[test]
    fn test_rejects_misdigited_ids() {
        assert!(Translator::new([14], [24]).is_err());
        assert!(Translator::new([11], [25]).is_err());
    }

    #[test]
    fn test_is_channel_agrees_with_digit_and_range() {
        let t = tiny();
        for topaz in t.iter_hillslopes().chain(t.iter_channels()).collect::<Vec<_>>() {
            let by_digit = is_channel_topaz(topaz);
            let by_range = t.wepp(topaz).unwrap() > t.hillslope_count() as i32;
            assert_eq!(t.is_channel(topaz), by_digit);
            assert_eq!(by_digit, by_range);
        }
    }
}
