// clause.rs — Parallelism levels and explicit clause sets
//
// Shared vocabulary for every phase: the ordered `ParallelismLevel`
// (`Gang > Worker > Vector > Seq`), the explicit clause set written on a loop
// construct, and the resource clauses written on a compute region.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: `LoopClauses::check` reports conflicting explicit clauses.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

// ── Parallelism level ───────────────────────────────────────────────────────

/// A parallelism level. Variant order gives `Seq < Vector < Worker < Gang`,
/// so `max` picks the coarsest level and `min` the finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelismLevel {
    Seq,
    Vector,
    Worker,
    Gang,
}

impl ParallelismLevel {
    /// All levels, coarsest first.
    pub const ALL: [ParallelismLevel; 4] = [
        ParallelismLevel::Gang,
        ParallelismLevel::Worker,
        ParallelismLevel::Vector,
        ParallelismLevel::Seq,
    ];

    /// The next level strictly below this one. `Seq` is its own floor.
    pub fn below(self) -> ParallelismLevel {
        match self {
            ParallelismLevel::Gang => ParallelismLevel::Worker,
            ParallelismLevel::Worker => ParallelismLevel::Vector,
            ParallelismLevel::Vector | ParallelismLevel::Seq => ParallelismLevel::Seq,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParallelismLevel::Gang => "gang",
            ParallelismLevel::Worker => "worker",
            ParallelismLevel::Vector => "vector",
            ParallelismLevel::Seq => "seq",
        }
    }
}

impl fmt::Display for ParallelismLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Loop clauses ────────────────────────────────────────────────────────────

/// A clause a programmer may write on a loop construct.
///
/// `Auto` and `Independent` are markers orthogonal to the level clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopClause {
    Gang,
    Worker,
    Vector,
    Seq,
    Auto,
    Independent,
}

impl LoopClause {
    pub fn level(self) -> Option<ParallelismLevel> {
        match self {
            LoopClause::Gang => Some(ParallelismLevel::Gang),
            LoopClause::Worker => Some(ParallelismLevel::Worker),
            LoopClause::Vector => Some(ParallelismLevel::Vector),
            LoopClause::Seq => Some(ParallelismLevel::Seq),
            LoopClause::Auto | LoopClause::Independent => None,
        }
    }

    pub fn from_level(level: ParallelismLevel) -> LoopClause {
        match level {
            ParallelismLevel::Gang => LoopClause::Gang,
            ParallelismLevel::Worker => LoopClause::Worker,
            ParallelismLevel::Vector => LoopClause::Vector,
            ParallelismLevel::Seq => LoopClause::Seq,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoopClause::Auto => "auto",
            LoopClause::Independent => "independent",
            other => other.level().map(ParallelismLevel::as_str).unwrap_or(""),
        }
    }
}

impl fmt::Display for LoopClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a loop clause set is not acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseConflict {
    /// More than one of gang/worker/vector/seq.
    MultipleLevels(ParallelismLevel, ParallelismLevel),
    /// Two of auto/seq/independent.
    ExclusiveMarkers(LoopClause, LoopClause),
    /// `auto` together with a gang/worker/vector clause.
    AutoWithLevel(ParallelismLevel),
}

impl fmt::Display for ClauseConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClauseConflict::MultipleLevels(a, b) => {
                write!(f, "'{a}' and '{b}' clauses on the same loop construct")
            }
            ClauseConflict::ExclusiveMarkers(a, b) => {
                write!(f, "'{a}' and '{b}' clauses are mutually exclusive")
            }
            ClauseConflict::AutoWithLevel(level) => {
                write!(f, "'auto' clause conflicts with '{level}' clause")
            }
        }
    }
}

/// The explicit clause set of one loop construct (possibly empty).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LoopClauses(BTreeSet<LoopClause>);

impl LoopClauses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the clause was already present.
    pub fn insert(&mut self, clause: LoopClause) -> bool {
        self.0.insert(clause)
    }

    pub fn contains(&self, clause: LoopClause) -> bool {
        self.0.contains(&clause)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LoopClause> + '_ {
        self.0.iter().copied()
    }

    pub fn is_auto(&self) -> bool {
        self.contains(LoopClause::Auto)
    }

    pub fn is_independent(&self) -> bool {
        self.contains(LoopClause::Independent)
    }

    /// The single explicit level clause, if any. Assumes `check` passed;
    /// with conflicting clauses the coarsest level is returned.
    pub fn explicit_level(&self) -> Option<ParallelismLevel> {
        self.0.iter().filter_map(|c| c.level()).max()
    }

    /// Validate the clause set: at most one level, `auto`/`seq`/`independent`
    /// pairwise exclusive, and `auto` never combined with a level.
    pub fn check(&self) -> Result<(), ClauseConflict> {
        let levels: Vec<ParallelismLevel> = self
            .0
            .iter()
            .filter_map(|c| c.level())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .rev()
            .collect();
        if levels.len() > 1 {
            return Err(ClauseConflict::MultipleLevels(levels[0], levels[1]));
        }
        let markers: Vec<LoopClause> = [LoopClause::Seq, LoopClause::Auto, LoopClause::Independent]
            .into_iter()
            .filter(|c| self.contains(*c))
            .collect();
        if markers.len() > 1 {
            return Err(ClauseConflict::ExclusiveMarkers(markers[0], markers[1]));
        }
        if self.is_auto() {
            if let Some(level) = levels.first() {
                return Err(ClauseConflict::AutoWithLevel(*level));
            }
        }
        Ok(())
    }
}

impl FromIterator<LoopClause> for LoopClauses {
    fn from_iter<T: IntoIterator<Item = LoopClause>>(iter: T) -> Self {
        LoopClauses(iter.into_iter().collect())
    }
}

impl fmt::Display for LoopClauses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for clause in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{clause}")?;
            first = false;
        }
        Ok(())
    }
}

// ── Compute regions ─────────────────────────────────────────────────────────

/// Which compute construct opened the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Parallel,
    Kernels,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Parallel => f.write_str("parallel"),
            RegionKind::Kernels => f.write_str("kernels"),
        }
    }
}

/// Numeric resource clauses of a compute region. Only read by inference to
/// report the count matching a loop's level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct RegionClauses {
    pub num_gangs: Option<u32>,
    pub num_workers: Option<u32>,
    pub vector_length: Option<u32>,
}

impl RegionClauses {
    /// The resource count that partitions work at `level`.
    pub fn count_for(&self, level: ParallelismLevel) -> Option<u32> {
        match level {
            ParallelismLevel::Gang => self.num_gangs,
            ParallelismLevel::Worker => self.num_workers,
            ParallelismLevel::Vector => self.vector_length,
            ParallelismLevel::Seq => None,
        }
    }
}

impl fmt::Display for RegionClauses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(n) = self.num_gangs {
            parts.push(format!("num_gangs({n})"));
        }
        if let Some(n) = self.num_workers {
            parts.push(format!("num_workers({n})"));
        }
        if let Some(n) = self.vector_length {
            parts.push(format!("vector_length({n})"));
        }
        f.write_str(&parts.join(" "))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
