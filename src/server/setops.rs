//! Handlers for the filtered range and set cardinality commands

use crate::db::Db;
use crate::range::RangeQuery;
use crate::resp::{PostponedArray, RespValue};
use crate::scan;
use crate::types::{ScanDirection, SetOp, SetOpMode};

/// Z{INTER,DIFF}[REV]RANGEBYSCORE subject filter first second
///     [WITHSCORES] [LIMIT offset count] [WITHSCORES]
pub fn cmd_filtered_range(
    db: &Db,
    command: &str,
    args: &[Vec<u8>],
    mode: SetOpMode,
    direction: ScanDirection,
) -> RespValue {
    let query = match RangeQuery::parse(command, args, mode, direction) {
        Ok(q) => q,
        Err(e) => return RespValue::from(e),
    };

    let reader = db.reader();
    // buffered until the scan succeeds so an error never follows partial output
    let mut reply = PostponedArray::new(query.output.with_scores);
    match scan::run(&reader, &query, &mut reply) {
        Ok(summary) => {
            tracing::debug!(
                command,
                subject = %query.subject,
                filter = %query.filter,
                outcome = ?summary.outcome,
                scanned = summary.scanned,
                qualified = summary.qualified,
                emitted = summary.emitted,
                "filtered range"
            );
            RespValue::Encoded(reply.finish())
        }
        Err(e) => RespValue::from(e),
    }
}

/// SDIFFCARD / SINTERCARD / SUNIONCARD key [key ...]
pub fn cmd_setcard(db: &Db, op: SetOp, args: &[Vec<u8>]) -> RespValue {
    let keys: Vec<&str> = match args
        .iter()
        .map(|k| std::str::from_utf8(k))
        .collect::<std::result::Result<Vec<_>, _>>()
    {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.setop_card(op, &keys) {
        Ok(count) => RespValue::Integer(count),
        Err(e) => RespValue::from(e),
    }
}
