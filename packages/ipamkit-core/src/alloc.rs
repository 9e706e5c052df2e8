//! Free address block search.
//!
//! A subnet's used addresses are sparse, so free runs are derived from the
//! gaps between sorted used addresses instead of walking every address of
//! the range. That keeps IPv6 subnets as cheap as IPv4 ones.
//!
//! The search is advisory: nothing is reserved. Two clients asking at the
//! same time get the same answer, and the loser finds out when it
//! registers the address.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// How to choose between several free runs that are long enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FitPolicy {
    /// Lowest-addressed run.
    #[default]
    FirstFit,
    /// Shortest run.
    BestFit,
    /// Longest run.
    WorstFit,
}

impl FitPolicy {
    /// The part of a network a policy searches. First-fit walks every
    /// address of the network; best-fit and worst-fit only its hosts.
    pub fn search_range(self, net: IpNetwork) -> AddressRange {
        match self {
            FitPolicy::FirstFit => AddressRange::full(net),
            FitPolicy::BestFit | FitPolicy::WorstFit => AddressRange::hosts(net),
        }
    }
}

impl FromStr for FitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "first" | "firstfit" => Ok(FitPolicy::FirstFit),
            "best" | "bestfit" => Ok(FitPolicy::BestFit),
            "worst" | "worstfit" => Ok(FitPolicy::WorstFit),
            _ => Err(format!(
                "unknown fit policy '{}' (expected FirstFit, BestFit or WorstFit)",
                s
            )),
        }
    }
}

impl fmt::Display for FitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitPolicy::FirstFit => write!(f, "FirstFit"),
            FitPolicy::BestFit => write!(f, "BestFit"),
            FitPolicy::WorstFit => write!(f, "WorstFit"),
        }
    }
}

/// An inclusive interval of addresses of one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    first: u128,
    last: u128,
    v4: bool,
}

fn to_num(ip: IpAddr) -> (u128, bool) {
    match ip {
        IpAddr::V4(a) => (u128::from(u32::from(a)), true),
        IpAddr::V6(a) => (u128::from(a), false),
    }
}

fn to_ip(value: u128, v4: bool) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

impl AddressRange {
    /// `first..=last`, or `None` when families differ or the bounds are reversed.
    pub fn new(first: IpAddr, last: IpAddr) -> Option<Self> {
        let (first, first_v4) = to_num(first);
        let (last, last_v4) = to_num(last);
        (first_v4 == last_v4 && first <= last).then_some(Self {
            first,
            last,
            v4: first_v4,
        })
    }

    /// Every address of the network, network and broadcast included.
    pub fn full(net: IpNetwork) -> Self {
        let (value, v4) = to_num(net.ip());
        let bits: u32 = if v4 { 32 } else { 128 };
        let host_bits = bits - u32::from(net.prefix());
        let span = if host_bits >= 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        };
        let first = value & !span;
        Self {
            first,
            last: first | span,
            v4,
        }
    }

    /// The assignable host addresses of a network.
    ///
    /// IPv4 drops the network and broadcast addresses and IPv6 drops the
    /// subnet-router anycast address. Point-to-point (/31, /127) and host
    /// (/32, /128) networks keep every address.
    pub fn hosts(net: IpNetwork) -> Self {
        let full = Self::full(net);
        let point_to_point = if full.v4 { 31 } else { 127 };
        if net.prefix() >= point_to_point {
            return full;
        }
        Self {
            first: full.first + 1,
            last: if full.v4 { full.last - 1 } else { full.last },
            v4: full.v4,
        }
    }

    pub fn first(&self) -> IpAddr {
        to_ip(self.first, self.v4)
    }

    pub fn last(&self) -> IpAddr {
        to_ip(self.last, self.v4)
    }

    /// Number of addresses, saturating for `::/0`.
    pub fn len(&self) -> u128 {
        (self.last - self.first).saturating_add(1)
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.offset_of(ip).is_some()
    }

    fn offset_of(&self, ip: IpAddr) -> Option<u128> {
        let (value, v4) = to_num(ip);
        (v4 == self.v4 && value >= self.first && value <= self.last).then_some(value)
    }

    /// Positional lookup. Negative indices count back from the last address.
    pub fn nth(&self, index: i128) -> Option<IpAddr> {
        let value = if index >= 0 {
            self.first
                .checked_add(index.unsigned_abs())
                .filter(|v| *v <= self.last)?
        } else {
            self.last
                .checked_sub(index.unsigned_abs() - 1)
                .filter(|v| *v >= self.first)?
        };
        Some(to_ip(value, self.v4))
    }
}

/// A maximal run of consecutive free addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeRun {
    pub start: IpAddr,
    pub len: u128,
}

impl FreeRun {
    /// The first `count` addresses of the run.
    pub fn addresses(&self, count: usize) -> impl Iterator<Item = IpAddr> + use<> {
        let (start, v4) = to_num(self.start);
        let count = (count as u128).min(self.len);
        (0..count).map(move |offset| to_ip(start + offset, v4))
    }
}

/// Iterator over the free runs of a range, in address order.
#[derive(Debug)]
pub struct FreeRuns {
    range: AddressRange,
    used: std::vec::IntoIter<u128>,
    /// Next address not yet accounted for; `None` once the range is exhausted.
    cursor: Option<u128>,
}

impl FreeRuns {
    fn run(&self, start: u128, len: u128) -> FreeRun {
        FreeRun {
            start: to_ip(start, self.range.v4),
            len,
        }
    }
}

impl Iterator for FreeRuns {
    type Item = FreeRun;

    fn next(&mut self) -> Option<FreeRun> {
        loop {
            let cursor = self.cursor?;
            match self.used.next() {
                Some(used) => {
                    self.cursor = used
                        .checked_add(1)
                        .filter(|next| *next <= self.range.last);
                    if used > cursor {
                        return Some(self.run(cursor, used - cursor));
                    }
                }
                None => {
                    self.cursor = None;
                    let len = (self.range.last - cursor).saturating_add(1);
                    return Some(self.run(cursor, len));
                }
            }
        }
    }
}

/// Build the free runs of `range` given the used addresses.
///
/// Used addresses outside the range or of the other family are ignored,
/// and duplicates collapse.
pub fn free_runs(range: AddressRange, used: impl IntoIterator<Item = IpAddr>) -> FreeRuns {
    let mut offsets: Vec<u128> = used
        .into_iter()
        .filter_map(|ip| range.offset_of(ip))
        .collect();
    offsets.sort_unstable();
    offsets.dedup();

    FreeRuns {
        range,
        used: offsets.into_iter(),
        cursor: Some(range.first),
    }
}

/// Pick the run a policy selects for a block of `num` addresses.
///
/// First-fit returns the lowest run truncated to `num`. Best-fit and
/// worst-fit return the whole shortest or longest qualifying run; among
/// equal lengths the last one found wins.
pub fn select_run(
    range: AddressRange,
    used: impl IntoIterator<Item = IpAddr>,
    num: usize,
    policy: FitPolicy,
) -> Option<FreeRun> {
    if num == 0 {
        return None;
    }
    let need = num as u128;
    let mut candidates = free_runs(range, used).filter(|run| run.len >= need);

    match policy {
        FitPolicy::FirstFit => candidates
            .next()
            .map(|run| FreeRun { len: need, ..run }),
        FitPolicy::BestFit => candidates.fold(None, |best, run| match best {
            Some(best) if best.len < run.len => Some(best),
            _ => Some(run),
        }),
        FitPolicy::WorstFit => candidates.fold(None, |worst, run| match worst {
            Some(worst) if worst.len > run.len => Some(worst),
            _ => Some(run),
        }),
    }
}

/// Find exactly `num` contiguous free addresses. Empty when none fit.
pub fn find_free_block(
    range: AddressRange,
    used: impl IntoIterator<Item = IpAddr>,
    num: usize,
    policy: FitPolicy,
) -> Vec<IpAddr> {
    select_run(range, used, num, policy)
        .map(|run| run.addresses(num).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    /// 10.0.0.0/27 hosts are .1-.30. Used: .4 .5 .9 .20 .21 .22
    /// Free runs: .1-.3 (3), .6-.8 (3), .10-.19 (10), .23-.30 (8)
    fn lab() -> (AddressRange, Vec<IpAddr>) {
        let used = ["10.0.0.4", "10.0.0.5", "10.0.0.9", "10.0.0.20", "10.0.0.21", "10.0.0.22"]
            .iter()
            .map(|s| ip(s))
            .collect();
        (AddressRange::hosts(net("10.0.0.0/27")), used)
    }

    #[test]
    fn test_fit_policy_parse() {
        assert_eq!("FirstFit".parse::<FitPolicy>().unwrap(), FitPolicy::FirstFit);
        assert_eq!("best".parse::<FitPolicy>().unwrap(), FitPolicy::BestFit);
        assert_eq!("worst-fit".parse::<FitPolicy>().unwrap(), FitPolicy::WorstFit);
        assert!("random".parse::<FitPolicy>().is_err());
        assert_eq!(FitPolicy::default(), FitPolicy::FirstFit);
    }

    #[test]
    fn test_search_range_per_policy() {
        let n = net("10.0.0.0/30");
        let first = FitPolicy::FirstFit.search_range(n);
        assert_eq!((first.first(), first.last()), (ip("10.0.0.0"), ip("10.0.0.3")));
        for policy in [FitPolicy::BestFit, FitPolicy::WorstFit] {
            let hosts = policy.search_range(n);
            assert_eq!((hosts.first(), hosts.last()), (ip("10.0.0.1"), ip("10.0.0.2")));
        }
    }

    #[test]
    fn test_host_ranges() {
        let v4 = AddressRange::hosts(net("192.168.1.0/24"));
        assert_eq!(v4.first(), ip("192.168.1.1"));
        assert_eq!(v4.last(), ip("192.168.1.254"));
        assert_eq!(v4.len(), 254);

        let p2p = AddressRange::hosts(net("192.168.1.4/31"));
        assert_eq!((p2p.first(), p2p.last()), (ip("192.168.1.4"), ip("192.168.1.5")));

        let host = AddressRange::hosts(net("192.168.1.9/32"));
        assert_eq!(host.len(), 1);

        let v6 = AddressRange::hosts(net("2001:db8::/126"));
        assert_eq!(v6.first(), ip("2001:db8::1"));
        assert_eq!(v6.last(), ip("2001:db8::3"));

        // Base address with host bits set still yields the whole network.
        let sloppy = AddressRange::full(net("10.9.8.77/24"));
        assert_eq!(sloppy.first(), ip("10.9.8.0"));
        assert_eq!(sloppy.last(), ip("10.9.8.255"));

        assert_eq!(AddressRange::full(net("::/0")).len(), u128::MAX);
    }

    #[test]
    fn test_nth_indexes_both_ends() {
        let range = AddressRange::full(net("10.0.0.0/24"));
        assert_eq!(range.nth(0), Some(ip("10.0.0.0")));
        assert_eq!(range.nth(-1), Some(ip("10.0.0.255")));
        assert_eq!(range.nth(-2), Some(ip("10.0.0.254")));
        assert_eq!(range.nth(255), Some(ip("10.0.0.255")));
        assert_eq!(range.nth(256), None);
        assert_eq!(range.nth(-257), None);
    }

    #[test]
    fn test_free_runs_split_on_used() {
        let (range, used) = lab();
        let runs: Vec<_> = free_runs(range, used).map(|r| (r.start, r.len)).collect();
        assert_eq!(
            runs,
            vec![
                (ip("10.0.0.1"), 3),
                (ip("10.0.0.6"), 3),
                (ip("10.0.0.10"), 10),
                (ip("10.0.0.23"), 8),
            ]
        );
    }

    #[test]
    fn test_free_runs_edges() {
        let range = AddressRange::hosts(net("10.0.0.0/29"));
        // Nothing used: one run over the whole range.
        let all: Vec<_> = free_runs(range, Vec::new()).collect();
        assert_eq!(all, vec![FreeRun { start: ip("10.0.0.1"), len: 6 }]);

        // Everything used, plus noise outside the range and of the other family.
        let mut used: Vec<IpAddr> = (1..=6).map(|i| ip(&format!("10.0.0.{}", i))).collect();
        used.push(ip("10.0.0.0"));
        used.push(ip("10.1.0.3"));
        used.push(ip("2001:db8::1"));
        used.push(ip("10.0.0.3"));
        assert_eq!(free_runs(range, used).count(), 0);

        // Used at both ends only.
        let runs: Vec<_> = free_runs(range, vec![ip("10.0.0.6"), ip("10.0.0.1")]).collect();
        assert_eq!(runs, vec![FreeRun { start: ip("10.0.0.2"), len: 4 }]);
    }

    #[test]
    fn test_free_runs_top_of_address_space() {
        let range = AddressRange::full(net("ffff:ffff:ffff:ffff:ffff:ffff:ffff:fff0/124"));
        let runs: Vec<_> = free_runs(range, vec![ip("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")]).collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len, 15);
    }

    #[test]
    fn test_first_fit_takes_lowest_run() {
        let (range, used) = lab();
        assert_eq!(
            find_free_block(range, used.clone(), 3, FitPolicy::FirstFit),
            vec![ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.3")]
        );
        let run = select_run(range, used, 4, FitPolicy::FirstFit).unwrap();
        assert_eq!(run, FreeRun { start: ip("10.0.0.10"), len: 4 });
    }

    #[test]
    fn test_best_and_worst_fit() {
        let (range, used) = lab();
        let best = select_run(range, used.clone(), 4, FitPolicy::BestFit).unwrap();
        assert_eq!(best, FreeRun { start: ip("10.0.0.23"), len: 8 });

        let worst = select_run(range, used.clone(), 4, FitPolicy::WorstFit).unwrap();
        assert_eq!(worst, FreeRun { start: ip("10.0.0.10"), len: 10 });

        assert_eq!(
            find_free_block(range, used, 2, FitPolicy::WorstFit),
            vec![ip("10.0.0.10"), ip("10.0.0.11")]
        );
    }

    #[test]
    fn test_ties_go_to_last_run_found() {
        let (range, used) = lab();
        // Two runs of length 3: .1 and .6
        let best = select_run(range, used, 3, FitPolicy::BestFit).unwrap();
        assert_eq!(best.start, ip("10.0.0.6"));

        let range = AddressRange::hosts(net("10.0.0.0/28"));
        // Runs .1-.4 and .6-.9 (4 each), .11-.14 (4)
        let used = vec![ip("10.0.0.5"), ip("10.0.0.10")];
        let worst = select_run(range, used, 1, FitPolicy::WorstFit).unwrap();
        assert_eq!(worst.start, ip("10.0.0.11"));
    }

    #[test]
    fn test_no_fit_is_empty_for_every_policy() {
        let (range, used) = lab();
        for policy in [FitPolicy::FirstFit, FitPolicy::BestFit, FitPolicy::WorstFit] {
            assert!(find_free_block(range, used.clone(), 11, policy).is_empty());
            assert!(find_free_block(range, used.clone(), 0, policy).is_empty());
        }
    }

    #[test]
    fn test_block_is_free_contained_and_stable() {
        let (range, used) = lab();
        for policy in [FitPolicy::FirstFit, FitPolicy::BestFit, FitPolicy::WorstFit] {
            for num in 1..=10 {
                let block = find_free_block(range, used.clone(), num, policy);
                assert_eq!(block.len(), num);
                assert!(block.iter().all(|a| range.contains(*a) && !used.contains(a)));
                assert_eq!(block, find_free_block(range, used.clone(), num, policy));
            }
        }
    }

    #[test]
    fn test_policies_pick_extreme_lengths() {
        let (range, used) = lab();
        let lengths: Vec<u128> = free_runs(range, used.clone()).map(|r| r.len).collect();
        for num in 1..=10usize {
            let qualifying: Vec<u128> = lengths.iter().copied().filter(|l| *l >= num as u128).collect();
            let best = select_run(range, used.clone(), num, FitPolicy::BestFit).unwrap();
            let worst = select_run(range, used.clone(), num, FitPolicy::WorstFit).unwrap();
            assert_eq!(Some(best.len), qualifying.iter().copied().min());
            assert_eq!(Some(worst.len), qualifying.iter().copied().max());
        }
    }

    #[test]
    fn test_sparse_ipv6_subnet() {
        let range = AddressRange::hosts(net("2001:db8::/64"));
        let used = vec![ip("2001:db8::1"), ip("2001:db8::3")];
        assert_eq!(
            find_free_block(range, used.clone(), 1, FitPolicy::FirstFit),
            vec![ip("2001:db8::2")]
        );
        let worst = select_run(range, used, 2, FitPolicy::WorstFit).unwrap();
        assert_eq!(worst.start, ip("2001:db8::4"));
        assert_eq!(worst.len, (1u128 << 64) - 4);
    }
}
