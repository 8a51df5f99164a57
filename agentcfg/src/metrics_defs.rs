//! Metrics definitions for agent configuration fetching.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "agentcfg.cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of fetches answered from a fresh cache entry",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "agentcfg.cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of fetches that found no fresh cache entry",
};

pub const FETCH_JOINED: MetricDef = MetricDef {
    name: "agentcfg.fetch.joined",
    metric_type: MetricType::Counter,
    description: "Number of fetches that joined a store query already in flight",
};

pub const FETCH_ERRORS: MetricDef = MetricDef {
    name: "agentcfg.fetch.errors",
    metric_type: MetricType::Counter,
    description: "Number of store queries that failed. Tagged with reason.",
};

pub const FETCH_DURATION: MetricDef = MetricDef {
    name: "agentcfg.fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Store query duration in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    FETCH_JOINED,
    FETCH_ERRORS,
    FETCH_DURATION,
];
