use std::collections::BTreeMap;

/// StatisticTags identify the emitting service instance, e.g. its bind
/// address. They merge under caller-supplied tags: on a key collision the
/// caller wins.
pub type StatisticTags = BTreeMap<String, String>;

/// Statistic is a point-in-time snapshot of a service's monitoring counters,
/// suitable for periodic collection into the monitoring database.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Statistic {
    pub name: String,
    pub tags: StatisticTags,
    pub values: BTreeMap<String, serde_json::Value>,
}

impl Statistic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: StatisticTags::new(),
            values: BTreeMap::new(),
        }
    }

    /// Merge `defaults` into this Statistic's tags, keeping any tag the
    /// caller already set.
    pub fn merge_default_tags(mut self, defaults: &StatisticTags) -> Self {
        for (key, value) in defaults {
            self.tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    pub fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.tags.extend(tags);
        self
    }

    pub fn with_value(mut self, key: &str, value: u64) -> Self {
        self.values
            .insert(key.to_string(), serde_json::Value::from(value));
        self
    }
}
