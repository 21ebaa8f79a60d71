use crate::error::{Error, Result};
use crate::translator::Translator;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Upstream slots available per channel in the structure file.
pub const MAX_UPSTREAM: usize = 3;

/// Channel network keyed by channel topaz id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelNetwork {
    /// Channel to the channels draining directly into it.
    upstream: BTreeMap<i32, Vec<i32>>,
    /// Channel to the channel it drains into; the outlet channel has none.
    downstream: BTreeMap<i32, i32>,
}

impl ChannelNetwork {
    pub fn new(upstream: BTreeMap<i32, Vec<i32>>) -> Result<Self> {
        let mut network = ChannelNetwork {
            upstream: BTreeMap::new(),
            downstream: BTreeMap::new(),
        };
        for (chn, ups) in upstream {
            let mut ups = ups;
            ups.sort_unstable();
            ups.dedup();
            if ups.len() > MAX_UPSTREAM {
                return Err(Error::validation(format!(
                    "channel {} has {} upstream channels, at most {} are supported",
                    chn,
                    ups.len(),
                    MAX_UPSTREAM
                )));
            }
            for up in &ups {
                if let Some(prev) = network.downstream.insert(*up, chn) {
                    return Err(Error::validation(format!(
                        "channel {} drains into both {} and {}",
                        up, prev, chn
                    )));
                }
            }
            network.upstream.insert(chn, ups);
        }
        // channels that only appear as upstream entries
        let orphans: Vec<i32> = network
            .downstream
            .keys()
            .filter(|c| !network.upstream.contains_key(c))
            .copied()
            .collect();
        for c in orphans {
            network.upstream.insert(c, Vec::new());
        }
        network.routing_order()?;
        Ok(network)
    }

    pub fn channels(&self) -> impl Iterator<Item = i32> + '_ {
        self.upstream.keys().copied()
    }

    pub fn upstream_of(&self, chn: i32) -> &[i32] {
        self.upstream.get(&chn).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn downstream_of(&self, chn: i32) -> Option<i32> {
        self.downstream.get(&chn).copied()
    }

    pub fn outlets(&self) -> Vec<i32> {
        self.channels()
            .filter(|c| !self.downstream.contains_key(c))
            .collect()
    }

    /// Headwaters first, each channel after everything draining into it.
    pub fn routing_order(&self) -> Result<Vec<i32>> {
        let mut in_degree: BTreeMap<i32, usize> = self
            .upstream
            .iter()
            .map(|(c, ups)| (*c, ups.len()))
            .collect();
        let mut queue: VecDeque<i32> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(c, _)| *c)
            .collect();
        if queue.is_empty() && !in_degree.is_empty() {
            return Err(Error::validation(
                "no headwater channels found, the network has a cycle",
            ));
        }

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(current) = queue.pop_front() {
            order.push(current);
            if let Some(down) = self.downstream.get(&current) {
                if let Some(degree) = in_degree.get_mut(down) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*down);
                    }
                }
            }
        }

        if order.len() != in_degree.len() {
            return Err(Error::validation(format!(
                "cycle in channel network: ordered {} of {} channels",
                order.len(),
                in_degree.len()
            )));
        }
        Ok(order)
    }

    /// `chn` and every channel upstream of it.
    pub fn upland_channels(&self, chn: i32) -> Vec<i32> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![chn];
        while let Some(c) = stack.pop() {
            if seen.insert(c) {
                stack.extend(self.upstream_of(c).iter().copied());
            }
        }
        seen.into_iter().collect()
    }

    /// Hillslopes draining to `chn` directly or through upstream channels.
    pub fn upland_hillslopes(&self, chn: i32, translator: &Translator) -> Vec<i32> {
        let hills: BTreeSet<i32> = self
            .upland_channels(chn)
            .into_iter()
            .flat_map(|c| translator.channel_hillslopes(c))
            .collect();
        hills.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> ChannelNetwork {
        ChannelNetwork::new(BTreeMap::from([(24, vec![14]), (14, vec![])])).unwrap()
    }

    #[test]
    fn test_routing_order_puts_headwaters_first() {
        let n = network();
        assert_eq!(n.routing_order().unwrap(), vec![14, 24]);
        assert_eq!(n.outlets(), vec![24]);
        assert_eq!(n.downstream_of(14), Some(24));
    }

    #[test]
    fn test_upland_hillslopes_is_transitive_without_duplicates() {
        let t = Translator::new([11, 12, 13, 21, 22, 23], [14, 24]).unwrap();
        let n = network();
        assert_eq!(n.upland_hillslopes(24, &t), vec![11, 12, 13, 21, 22, 23]);
        assert_eq!(n.upland_hillslopes(14, &t), vec![11, 12, 13]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let r = ChannelNetwork::new(BTreeMap::from([(24, vec![14]), (14, vec![24])]));
        assert!(r.is_err());
    }

    #[test]
    fn test_too_many_upstreams_is_rejected() {
        let r = ChannelNetwork::new(BTreeMap::from([(44, vec![14, 24, 34, 54])]));
        assert!(r.is_err());
    }
}
