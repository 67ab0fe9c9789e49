#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KeyType {
    String = 1,
    Set = 4,
    ZSet = 5,
}

impl KeyType {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(KeyType::String),
            4 => Some(KeyType::Set),
            5 => Some(KeyType::ZSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::Set => "set",
            KeyType::ZSet => "zset",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZMember {
    pub score: f64,
    pub member: Vec<u8>,
}

impl ZMember {
    pub fn new(score: f64, member: impl Into<Vec<u8>>) -> Self {
        Self {
            score,
            member: member.into(),
        }
    }
}

/// Order in which a score window is walked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Ascending score, ties by ascending member
    Forward,
    /// Descending score, ties by descending member
    Reverse,
}

impl ScanDirection {
    pub fn is_reverse(&self) -> bool {
        matches!(self, ScanDirection::Reverse)
    }
}

/// Membership test polarity of a filtered range query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpMode {
    /// Keep subject members that are absent from the filter set
    Difference,
    /// Keep subject members that are present in the filter set
    Intersection,
}

/// Plain set algebra used by the cardinality commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Diff,
    Inter,
    Union,
}

/// Score window handed to a range scan, always expressed as lower/upper.
///
/// `min > max` is a legal window; it simply contains nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl ScoreRange {
    pub fn new(min: f64, min_exclusive: bool, max: f64, max_exclusive: bool) -> Self {
        Self {
            min,
            max,
            min_exclusive,
            max_exclusive,
        }
    }

    /// Everything from `-inf` to `+inf`, inclusive
    pub fn all() -> Self {
        Self::new(f64::NEG_INFINITY, false, f64::INFINITY, false)
    }

    pub fn contains(&self, score: f64) -> bool {
        let above_min = if self.min_exclusive {
            score > self.min
        } else {
            score >= self.min
        };
        let below_max = if self.max_exclusive {
            score < self.max
        } else {
            score <= self.max
        };
        above_min && below_max
    }
}

/// Pagination over qualifying elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpec {
    /// Qualifying elements skipped before the first one is emitted
    pub offset: i64,
    /// Maximum number of emitted elements; negative means unbounded
    pub limit: i64,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: -1,
        }
    }
}

impl PageSpec {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit < 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub with_scores: bool,
}
