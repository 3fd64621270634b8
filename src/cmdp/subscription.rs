//! Per-topic subscription counters and the effective-level computation
//! they drive.

use std::collections::HashMap;

use crate::level::{Level, RECORD_LEVELS};

/// `subscriptions[topic_uc][level] += 1` on subscribe, `-= 1` (floored at
/// 0) on unsubscribe. The empty-topic key (`""`) is the global table.
#[derive(Default)]
pub struct SubscriptionTable {
    counts: HashMap<String, [u32; RECORD_LEVELS.len()]>,
}

fn level_index(level: Level) -> Option<usize> {
    RECORD_LEVELS.iter().position(|l| *l == level)
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `LOG/<LEVEL>[/<TOPIC>]`, returning `None` (and doing
    /// nothing) for anything else, including an unknown level string
    ///.
    fn parse(topic: &str) -> Option<(Level, String)> {
        let rest = topic.strip_prefix("LOG/")?;
        let mut parts = rest.splitn(2, '/');
        let level_str = parts.next().unwrap_or("");
        let topic_uc = parts.next().unwrap_or("").to_ascii_uppercase();
        // An empty level string subscribes to every level, which this
        // table represents as incrementing the most permissive (TRACE)
        // counter: the effective minimum search below starts at TRACE, so
        // a nonzero TRACE counter alone yields the most verbose result.
        let level = if level_str.is_empty() { Level::Trace } else { level_str.parse().ok()? };
        Some((level, topic_uc))
    }

    /// Returns whether the subscription was recognized and accounted for.
    pub fn subscribe(&mut self, topic: &str) -> bool {
        let Some((level, topic_uc)) = Self::parse(topic) else { return false };
        let Some(idx) = level_index(level) else { return false };
        self.counts.entry(topic_uc).or_default()[idx] += 1;
        true
    }

    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        let Some((level, topic_uc)) = Self::parse(topic) else { return false };
        let Some(idx) = level_index(level) else { return false };
        if let Some(counts) = self.counts.get_mut(&topic_uc) {
            counts[idx] = counts[idx].saturating_sub(1);
        }
        true
    }

    /// Lowest level with a non-zero counter for `topic_uc` (or the global
    /// table for `""`), `OFF` if none.
    pub fn minimum(&self, topic_uc: &str) -> Level {
        match self.counts.get(topic_uc) {
            Some(counts) => RECORD_LEVELS
                .iter()
                .zip(counts.iter())
                .find(|(_, count)| **count > 0)
                .map(|(level, _)| *level)
                .unwrap_or(Level::Off),
            None => Level::Off,
        }
    }

    pub fn global_minimum(&self) -> Level {
        self.minimum("")
    }

    /// Every topic with at least one active subscription, and its minimum
    /// level — excludes the global (`""`) table.
    pub fn topic_minimums(&self) -> HashMap<String, Level> {
        self.counts
            .iter()
            .filter(|(topic, _)| !topic.is_empty())
            .filter_map(|(topic, _)| {
                let min = self.minimum(topic);
                (min != Level::Off).then(|| (topic.clone(), min))
            })
            .collect()
    }

    /// `min(global, every subscribed topic that prefixes `logger_name`
    /// case-insensitively)`.
    pub fn effective_level_for(&self, logger_name: &str) -> Level {
        let logger_uc = logger_name.to_ascii_uppercase();
        let mut level = self.global_minimum();
        for (topic, topic_level) in self.topic_minimums() {
            if logger_uc.starts_with(&topic) {
                level = level.min(topic_level);
            }
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_subscribes_then_two_unsubscribes_raises_global_to_off() {
        let mut table = SubscriptionTable::new();
        table.subscribe("LOG/INFO");
        table.subscribe("LOG/INFO");
        assert_eq!(table.global_minimum(), Level::Info);
        table.unsubscribe("LOG/INFO");
        assert_eq!(table.global_minimum(), Level::Info);
        table.unsubscribe("LOG/INFO");
        assert_eq!(table.global_minimum(), Level::Off);
    }

    #[test]
    fn empty_level_topic_subscription_sets_trace_minimum() {
        let mut table = SubscriptionTable::new();
        table.subscribe("LOG//FSM");
        assert_eq!(table.minimum("FSM"), Level::Trace);
    }

    #[test]
    fn subscription_churn_scenario() {
        let mut table = SubscriptionTable::new();
        table.subscribe("LOG/INFO");
        table.subscribe("LOG/INFO/FSM");
        table.unsubscribe("LOG/INFO");
        assert_eq!(table.global_minimum(), Level::Off);
        assert_eq!(table.minimum("FSM"), Level::Info);
        assert_eq!(table.effective_level_for("FSM.child"), Level::Info);
        assert_eq!(table.effective_level_for("OTHER"), Level::Off);
    }

    #[test]
    fn unknown_level_string_is_ignored() {
        let mut table = SubscriptionTable::new();
        assert!(!table.subscribe("LOG/BOGUS"));
        assert_eq!(table.global_minimum(), Level::Off);
    }
}
