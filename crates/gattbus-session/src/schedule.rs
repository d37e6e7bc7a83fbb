use gattbus_protocol::GroupId;
use tokio::time::Instant;

use crate::config::SessionConfig;

/// Per-group due times for the polling loop.
#[derive(Debug, Clone)]
pub struct Schedule {
    due: [Instant; 7],
}

impl Schedule {
    /// Seed every group with its stagger offset from `now`.
    pub fn seeded(now: Instant, config: &SessionConfig) -> Self {
        Self {
            due: GroupId::ALL.map(|group| now + config.stagger_for(group)),
        }
    }

    /// Groups eligible for polling, highest priority first.
    pub fn priority(degraded: bool, desync: bool) -> impl Iterator<Item = GroupId> {
        GroupId::ALL.into_iter().filter(move |group| {
            if degraded {
                *group == GroupId::Status
            } else {
                !(desync && group.is_single_register())
            }
        })
    }

    /// The highest-priority group that is due at `now`.
    pub fn select(&self, now: Instant, degraded: bool, desync: bool) -> Option<GroupId> {
        Self::priority(degraded, desync).find(|group| self.due(*group) <= now)
    }

    /// Push `group` one period past `now`.
    pub fn reschedule(&mut self, group: GroupId, now: Instant, degraded: bool) {
        self.due[group as usize] = now + group.descriptor().period(degraded);
    }

    pub fn due(&self, group: GroupId) -> Instant {
        self.due[group as usize]
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn stagger_avoids_first_tick_collision() {
        let start = Instant::now();
        let schedule = Schedule::seeded(start, &SessionConfig::default());
        assert_eq!(schedule.select(start, false, false), Some(GroupId::Status));
        assert_eq!(schedule.due(GroupId::DeviceInfo), at(start, 4000));
    }

    #[test]
    fn never_selects_a_future_group() {
        let start = Instant::now();
        let mut schedule = Schedule::seeded(start, &SessionConfig::default());
        schedule.reschedule(GroupId::Status, start, false);
        assert_eq!(schedule.select(at(start, 100), false, false), None);
        assert_eq!(
            schedule.select(at(start, 130), false, false),
            Some(GroupId::ConfigBlock)
        );
    }

    #[test]
    fn priority_order_when_everything_is_due() {
        let start = Instant::now();
        let mut schedule = Schedule::seeded(start, &SessionConfig::default());
        let late = at(start, 10_000);
        let mut order = Vec::new();
        while let Some(group) = schedule.select(late, false, false) {
            order.push(group);
            schedule.reschedule(group, at(late, 1), false);
        }
        assert_eq!(order, GroupId::ALL.to_vec());
    }

    #[test]
    fn degraded_selects_only_status_on_slow_cadence() {
        let start = Instant::now();
        let mut schedule = Schedule::seeded(start, &SessionConfig::default());
        let late = at(start, 10_000);
        assert_eq!(schedule.select(late, true, false), Some(GroupId::Status));
        schedule.reschedule(GroupId::Status, late, true);
        assert_eq!(schedule.select(late, true, false), None);
        assert_eq!(schedule.due(GroupId::Status), at(late, 1500));
    }

    #[test]
    fn desync_skips_single_register_groups() {
        let start = Instant::now();
        let mut schedule = Schedule::seeded(start, &SessionConfig::default());
        schedule.reschedule(GroupId::Status, at(start, 4000), false);
        schedule.reschedule(GroupId::ConfigBlock, at(start, 4000), false);
        let groups: Vec<_> = Schedule::priority(false, true).collect();
        assert_eq!(
            groups,
            vec![GroupId::Status, GroupId::ConfigBlock, GroupId::DeviceInfo]
        );
        assert_eq!(
            schedule.select(at(start, 4000), false, true),
            Some(GroupId::DeviceInfo)
        );
    }
}
