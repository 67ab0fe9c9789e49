//! fastsetops - range-bounded sorted set intersection and difference over a
//! SQLite-backed Redis-compatible store
//!
//! # Example
//!
//! ```
//! use fastsetops::{Db, RangeQuery, ScanDirection, SetOp, SetOpMode, ZMember};
//!
//! let db = Db::open_memory().unwrap();
//! db.zadd("events", &[ZMember::new(1.0, "a"), ZMember::new(2.0, "b")]).unwrap();
//! db.zadd("seen", &[ZMember::new(0.0, "b")]).unwrap();
//!
//! // ZDIFFRANGEBYSCORE events seen -inf +inf
//! let query = RangeQuery::new(
//!     "events",
//!     "seen",
//!     (f64::NEG_INFINITY, false),
//!     (f64::INFINITY, false),
//!     SetOpMode::Difference,
//!     ScanDirection::Forward,
//! );
//! let unseen = db.zrangebyscore_filtered(&query).unwrap();
//! assert_eq!(unseen, vec![ZMember::new(1.0, "a")]);
//!
//! // SUNIONCARD
//! db.sadd("tags", &[b"x", b"y"]).unwrap();
//! assert_eq!(db.setop_card(SetOp::Union, &["tags"]).unwrap(), 2);
//! ```

pub mod card;
pub mod db;
pub mod error;
pub mod range;
pub mod resp;
pub mod scan;
pub mod server;
pub mod types;

pub use db::Db;
pub use error::{KvError, Result};
pub use range::RangeQuery;
pub use resp::RespValue;
pub use server::Server;
pub use types::{KeyType, OutputOptions, PageSpec, ScanDirection, ScoreRange, SetOp, SetOpMode, ZMember};
