/// Golden ratio: (1 + √5) / 2
pub const PHI: f64 = 1.618_033_988_749_895;

/// Golden angle in radians: π(3 − √5)
pub const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653_3;

/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Commitments with at least this importance count as urgent without a deadline.
pub const URGENT_IMPORTANCE: f64 = 0.58;

/// Overview: maximum urgent commitments when the memory overlay is off.
pub const OVERVIEW_COMMITMENT_LIMIT: usize = 18;

/// Memory-entity and pattern-entity edges per node in the overview.
pub const OVERVIEW_EVIDENCE_EDGES: usize = 4;

/// Neighborhood: memories attached to the frontier.
pub const NEIGHBORHOOD_MEMORY_LIMIT: usize = 60;

/// Neighborhood: patterns attached to the frontier.
pub const NEIGHBORHOOD_PATTERN_LIMIT: usize = 18;

pub const NEIGHBORHOOD_MEMORY_EDGES: usize = 4;
pub const NEIGHBORHOOD_PATTERN_EDGES: usize = 3;

/// Ranking boost for commitments inside a neighborhood.
pub const COMMITMENT_BOOST: f64 = 0.25;

/// Trace hop bounds.
pub const TRACE_MIN_DEPTH: usize = 2;
pub const TRACE_MAX_DEPTH: usize = 8;
pub const TRACE_DEFAULT_DEPTH: usize = 5;

/// Shared-memory evidence nodes attached to each trace hop.
pub const TRACE_EVIDENCE_PER_HOP: usize = 2;

/// Trace edge cost: `TRACE_BASE_COST - strength * TRACE_STRENGTH_WEIGHT`.
pub const TRACE_BASE_COST: f64 = 1.25;
pub const TRACE_STRENGTH_WEIGHT: f64 = 0.9;

/// Days since contact beyond `cadence * COOLING_FACTOR` marks a relationship as cooling.
pub const COOLING_FACTOR: f64 = 1.2;
