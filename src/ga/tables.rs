use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Target collection for an upstream dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GaTable {
    KpiDaily,
    KpiMonthly,
    ChannelDaily,
    SourceDaily,
    /// Table name with no known mapping; the dataset is ignored.
    Unknown,
}

static TABLE_SYNONYMS: Lazy<HashMap<&'static str, GaTable>> = Lazy::new(|| {
    use GaTable::*;
    HashMap::from([
        ("daily_metrics", KpiDaily),
        ("kpi_daily", KpiDaily),
        ("daily_kpi", KpiDaily),
        ("daily", KpiDaily),
        ("monthly_metrics", KpiMonthly),
        ("kpi_monthly", KpiMonthly),
        ("monthly_kpi", KpiMonthly),
        ("monthly", KpiMonthly),
        ("channel_daily", ChannelDaily),
        ("daily_channel", ChannelDaily),
        ("channel_metrics", ChannelDaily),
        ("channels", ChannelDaily),
        ("source_daily", SourceDaily),
        ("daily_source", SourceDaily),
        ("source_metrics", SourceDaily),
        ("sources", SourceDaily),
        ("traffic_sources", SourceDaily),
    ])
});

impl GaTable {
    pub fn from_name(name: &str) -> Self {
        TABLE_SYNONYMS
            .get(name.trim().to_lowercase().as_str())
            .copied()
            .unwrap_or(GaTable::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GaTable::KpiDaily => "kpi_daily",
            GaTable::KpiMonthly => "kpi_monthly",
            GaTable::ChannelDaily => "channel_daily",
            GaTable::SourceDaily => "source_daily",
            GaTable::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_is_case_and_whitespace_insensitive() {
        assert_eq!(GaTable::from_name("Daily_Metrics"), GaTable::KpiDaily);
        assert_eq!(GaTable::from_name("  KPI_MONTHLY "), GaTable::KpiMonthly);
        assert_eq!(GaTable::from_name("channels"), GaTable::ChannelDaily);
        assert_eq!(GaTable::from_name("Traffic_Sources"), GaTable::SourceDaily);
    }

    #[test]
    fn test_unknown_table() {
        assert_eq!(GaTable::from_name("geo_breakdown"), GaTable::Unknown);
        assert_eq!(GaTable::from_name(""), GaTable::Unknown);
    }
}
