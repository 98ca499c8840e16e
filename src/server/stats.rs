//! In-process statistics sink: aggregated property reports and discrete
//! failure-event counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// How a property report aggregates the values fed to it.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Aggregation {
    Avg,
    Sum,
    Max,
    Count,
}

/// Kinds of discrete failure events counted through `pp_report()`.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum PpKind {
    /// Binlog time lookup or backup-source resolution failure.
    BinlogErr,

    /// Unexpected exception, e.g. checkpoint file I/O failure.
    Exception,

    /// Cache store synchronization failure.
    CacheErr,
}

impl fmt::Display for PpKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PpKind::BinlogErr => write!(f, "SRP_BINLOG_ERR"),
            PpKind::Exception => write!(f, "SRP_EX"),
            PpKind::CacheErr => write!(f, "SRP_CACHE_ERR"),
        }
    }
}

/// Handle to a registered property report.
pub trait PropertyReport: Send + Sync {
    fn report(&self, value: i64);
}

/// Observability sink consumed by the background workers.
pub trait StatSink: Send + Sync {
    /// Registers a named property report. `None` on registration failure.
    fn create_property_report(
        &self,
        name: &str,
        aggregation: Aggregation,
    ) -> Option<Arc<dyn PropertyReport>>;

    /// Counts `count` occurrences of a discrete failure event.
    fn pp_report(&self, kind: PpKind, count: u64);
}

/// Aggregated state of one property.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PropertyStat {
    pub aggregation: Aggregation,

    /// Number of values reported.
    pub emissions: u64,

    pub sum: i64,
    pub max: Option<i64>,
    pub last: Option<i64>,
}

impl PropertyStat {
    fn new(aggregation: Aggregation) -> Self {
        PropertyStat {
            aggregation,
            emissions: 0,
            sum: 0,
            max: None,
            last: None,
        }
    }

    /// The aggregated value, `None` if nothing reported yet.
    pub fn value(&self) -> Option<i64> {
        if self.emissions == 0 {
            return None;
        }
        Some(match self.aggregation {
            Aggregation::Avg => self.sum / self.emissions as i64,
            Aggregation::Sum => self.sum,
            Aggregation::Max => self.max.unwrap_or_default(),
            Aggregation::Count => self.emissions as i64,
        })
    }
}

#[derive(Debug, Default)]
struct StatTables {
    properties: HashMap<String, PropertyStat>,
    events: HashMap<PpKind, u64>,
}

/// The statistics hub. Clone-able handle sharing one set of tables.
#[derive(Debug, Clone, Default)]
pub struct StatHub {
    tables: Arc<Mutex<StatTables>>,

    /// Names that refuse registration; lets tests exercise the init-time
    /// failure path.
    refused: Arc<Mutex<Vec<String>>>,
}

impl StatHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes later registrations of given property name fail.
    pub fn refuse_property(&self, name: &str) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.push(name.into());
        }
    }

    pub fn property(&self, name: &str) -> Option<PropertyStat> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.properties.get(name).copied())
    }

    pub fn events(&self, kind: PpKind) -> u64 {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.events.get(&kind).copied())
            .unwrap_or(0)
    }

    /// Logs a summary of everything collected so far.
    pub fn dump(&self) {
        let Ok(tables) = self.tables.lock() else {
            return;
        };
        for (name, stat) in tables.properties.iter() {
            pf_info!(
                "stat {} ({:?}) = {:?} over {} reports",
                name,
                stat.aggregation,
                stat.value(),
                stat.emissions
            );
        }
        for (kind, cnt) in tables.events.iter() {
            pf_info!("event {} x{}", kind, cnt);
        }
    }
}

/// Property report handle backed by a `StatHub`'s tables.
struct HubProperty {
    name: String,
    tables: Arc<Mutex<StatTables>>,
}

impl PropertyReport for HubProperty {
    fn report(&self, value: i64) {
        let Ok(mut tables) = self.tables.lock() else {
            return;
        };
        if let Some(stat) = tables.properties.get_mut(&self.name) {
            stat.emissions += 1;
            stat.sum += value;
            stat.max = Some(stat.max.map_or(value, |m| m.max(value)));
            stat.last = Some(value);
            pf_trace!("property {} reported {}", self.name, value);
        }
    }
}

impl StatSink for StatHub {
    fn create_property_report(
        &self,
        name: &str,
        aggregation: Aggregation,
    ) -> Option<Arc<dyn PropertyReport>> {
        if self
            .refused
            .lock()
            .ok()
            .map_or(true, |refused| refused.iter().any(|n| n == name))
        {
            return None;
        }

        let mut tables = self.tables.lock().ok()?;
        tables
            .properties
            .entry(name.into())
            .or_insert_with(|| PropertyStat::new(aggregation));
        Some(Arc::new(HubProperty {
            name: name.into(),
            tables: self.tables.clone(),
        }))
    }

    fn pp_report(&self, kind: PpKind, count: u64) {
        if let Ok(mut tables) = self.tables.lock() {
            *tables.events.entry(kind).or_default() += count;
        }
        pf_debug!("event {} reported x{}", kind, count);
    }
}

#[cfg(test)]
mod stats_tests {
    use super::*;

    #[test]
    fn property_aggregation() {
        let hub = StatHub::new();
        let avg = hub
            .create_property_report("latency", Aggregation::Avg)
            .unwrap();
        assert_eq!(hub.property("latency").unwrap().value(), None);
        avg.report(10);
        avg.report(20);
        avg.report(-3);
        let stat = hub.property("latency").unwrap();
        assert_eq!(stat.emissions, 3);
        assert_eq!(stat.value(), Some(9));
        assert_eq!(stat.max, Some(20));
        assert_eq!(stat.last, Some(-3));

        let max = hub.create_property_report("peak", Aggregation::Max).unwrap();
        max.report(4);
        max.report(2);
        assert_eq!(hub.property("peak").unwrap().value(), Some(4));
        hub.dump();
    }

    #[test]
    fn event_counters() {
        let hub = StatHub::new();
        assert_eq!(hub.events(PpKind::BinlogErr), 0);
        hub.pp_report(PpKind::BinlogErr, 1);
        hub.pp_report(PpKind::BinlogErr, 2);
        hub.pp_report(PpKind::CacheErr, 1);
        assert_eq!(hub.events(PpKind::BinlogErr), 3);
        assert_eq!(hub.events(PpKind::CacheErr), 1);
        assert_eq!(hub.events(PpKind::Exception), 0);
    }

    #[test]
    fn refused_registration() {
        let hub = StatHub::new();
        hub.refuse_property("broken");
        assert!(hub
            .create_property_report("broken", Aggregation::Avg)
            .is_none());
        assert!(hub.create_property_report("fine", Aggregation::Sum).is_some());
    }
}
