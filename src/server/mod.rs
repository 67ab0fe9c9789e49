mod setops;

use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::db::Db;
use crate::error::KvError;
use crate::range::parse_strict_float;
use crate::resp::{format_score, RespReader, RespValue};
use crate::types::{ScanDirection, SetOp, SetOpMode, ZMember};

pub struct Server {
    db: Db,
}

impl Server {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn run(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("fastsetops listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            tracing::debug!("Connection from {}", peer_addr);

            // Create a new session for this connection
            let session = self.db.session();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, session).await {
                    tracing::error!("Connection error: {}", e);
                }
            });
        }
    }
}

async fn handle_connection<S>(socket: S, mut db: Db) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(socket);
    let mut reader = RespReader::new(reader);

    loop {
        let args = match reader.read_command().await {
            Ok(Some(args)) => args,
            Ok(None) => break, // EOF
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                // the stream can't be resynchronized, so reply once and hang up
                writer
                    .write_all(&RespValue::error(e.to_string()).encode())
                    .await?;
                writer.flush().await?;
                break;
            }
            Err(e) => return Err(e),
        };

        let response = execute_command(&mut db, &args);
        writer.write_all(&response.encode()).await?;
        writer.flush().await?;

        if args.first().map_or(false, |c| c.eq_ignore_ascii_case(b"QUIT")) {
            break;
        }
    }

    Ok(())
}

fn execute_command(db: &mut Db, args: &[Vec<u8>]) -> RespValue {
    if args.is_empty() {
        return RespValue::error("empty command");
    }

    let cmd = String::from_utf8_lossy(&args[0]).to_uppercase();
    let cmd_args = &args[1..];

    match cmd.as_str() {
        // Server commands
        "PING" => cmd_ping(cmd_args),
        "ECHO" => cmd_echo(cmd_args),
        "COMMAND" => cmd_command(),
        // Client handshakes (SETNAME, SETINFO) are accepted and ignored
        "CLIENT" => RespValue::ok(),
        "QUIT" => RespValue::ok(),
        "SELECT" => cmd_select(db, cmd_args),
        "DBSIZE" => cmd_dbsize(db),
        "FLUSHDB" => cmd_flushdb(db),
        // Key and string commands
        "GET" => cmd_get(db, cmd_args),
        "SET" => cmd_set(db, cmd_args),
        "DEL" => cmd_del(db, cmd_args),
        "EXISTS" => cmd_exists(db, cmd_args),
        "TYPE" => cmd_type(db, cmd_args),
        // Set operations
        "SADD" => cmd_sadd(db, cmd_args),
        "SREM" => cmd_srem(db, cmd_args),
        "SMEMBERS" => cmd_smembers(db, cmd_args),
        "SCARD" => cmd_scard(db, cmd_args),
        "SDIFFCARD" => setops::cmd_setcard(db, SetOp::Diff, cmd_args),
        "SINTERCARD" => setops::cmd_setcard(db, SetOp::Inter, cmd_args),
        "SUNIONCARD" => setops::cmd_setcard(db, SetOp::Union, cmd_args),
        // Sorted set operations
        "ZADD" => cmd_zadd(db, cmd_args),
        "ZREM" => cmd_zrem(db, cmd_args),
        "ZSCORE" => cmd_zscore(db, cmd_args),
        "ZCARD" => cmd_zcard(db, cmd_args),
        "ZINTERRANGEBYSCORE" => setops::cmd_filtered_range(
            db,
            "zinterrangebyscore",
            cmd_args,
            SetOpMode::Intersection,
            ScanDirection::Forward,
        ),
        "ZINTERREVRANGEBYSCORE" => setops::cmd_filtered_range(
            db,
            "zinterrevrangebyscore",
            cmd_args,
            SetOpMode::Intersection,
            ScanDirection::Reverse,
        ),
        "ZDIFFRANGEBYSCORE" => setops::cmd_filtered_range(
            db,
            "zdiffrangebyscore",
            cmd_args,
            SetOpMode::Difference,
            ScanDirection::Forward,
        ),
        "ZDIFFREVRANGEBYSCORE" => setops::cmd_filtered_range(
            db,
            "zdiffrevrangebyscore",
            cmd_args,
            SetOpMode::Difference,
            ScanDirection::Reverse,
        ),
        _ => RespValue::error(format!("unknown command '{}'", cmd)),
    }
}

// --- Server commands ---

fn cmd_ping(args: &[Vec<u8>]) -> RespValue {
    if args.is_empty() {
        RespValue::pong()
    } else {
        RespValue::BulkString(Some(args[0].clone()))
    }
}

fn cmd_echo(args: &[Vec<u8>]) -> RespValue {
    if args.len() != 1 {
        return RespValue::error("wrong number of arguments for 'echo' command");
    }
    RespValue::BulkString(Some(args[0].clone()))
}

fn cmd_command() -> RespValue {
    // Minimal implementation for client compatibility
    RespValue::Array(Some(vec![]))
}

fn cmd_select(db: &mut Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() != 1 {
        return RespValue::error("wrong number of arguments for 'select' command");
    }

    let db_index: i32 = match std::str::from_utf8(&args[0])
        .ok()
        .and_then(|s| s.parse().ok())
    {
        Some(i) => i,
        None => return RespValue::error("value is not an integer or out of range"),
    };

    match db.select(db_index) {
        Ok(()) => RespValue::ok(),
        Err(_) => RespValue::error("DB index is out of range"),
    }
}

fn cmd_dbsize(db: &Db) -> RespValue {
    match db.dbsize() {
        Ok(count) => RespValue::Integer(count),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_flushdb(db: &Db) -> RespValue {
    match db.flushdb() {
        Ok(()) => RespValue::ok(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

// --- Key and string commands ---

fn key_list(args: &[Vec<u8>]) -> Option<Vec<&str>> {
    args.iter()
        .map(|k| std::str::from_utf8(k).ok())
        .collect()
}

fn cmd_get(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() != 1 {
        return RespValue::error("wrong number of arguments for 'get' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.get(key) {
        Ok(value) => value.into(),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_set(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() < 2 {
        return RespValue::error("wrong number of arguments for 'set' command");
    }
    if args.len() > 2 {
        return RespValue::from(KvError::SyntaxError);
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.set(key, &args[1]) {
        Ok(()) => RespValue::ok(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_del(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.is_empty() {
        return RespValue::error("wrong number of arguments for 'del' command");
    }

    let keys = match key_list(args) {
        Some(k) => k,
        None => return RespValue::error("invalid key"),
    };

    match db.del(&keys) {
        Ok(count) => RespValue::Integer(count),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_exists(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.is_empty() {
        return RespValue::error("wrong number of arguments for 'exists' command");
    }

    let keys = match key_list(args) {
        Some(k) => k,
        None => return RespValue::error("invalid key"),
    };

    match db.exists(&keys) {
        Ok(count) => RespValue::Integer(count),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_type(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() != 1 {
        return RespValue::error("wrong number of arguments for 'type' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.key_type(key) {
        Ok(Some(kt)) => RespValue::SimpleString(kt.as_str().to_string()),
        Ok(None) => RespValue::SimpleString("none".to_string()),
        Err(e) => RespValue::error(e.to_string()),
    }
}

// --- Set commands ---

fn cmd_sadd(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() < 2 {
        return RespValue::error("wrong number of arguments for 'sadd' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    let members: Vec<&[u8]> = args[1..].iter().map(|v| v.as_slice()).collect();

    match db.sadd(key, &members) {
        Ok(count) => RespValue::Integer(count),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_srem(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() < 2 {
        return RespValue::error("wrong number of arguments for 'srem' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    let members: Vec<&[u8]> = args[1..].iter().map(|v| v.as_slice()).collect();

    match db.srem(key, &members) {
        Ok(count) => RespValue::Integer(count),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_smembers(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() != 1 {
        return RespValue::error("wrong number of arguments for 'smembers' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.smembers(key) {
        Ok(members) => RespValue::Array(Some(
            members
                .into_iter()
                .map(|m| RespValue::BulkString(Some(m)))
                .collect(),
        )),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_scard(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() != 1 {
        return RespValue::error("wrong number of arguments for 'scard' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.scard(key) {
        Ok(count) => RespValue::Integer(count),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

// --- Sorted set commands ---

fn cmd_zadd(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() < 3 || (args.len() - 1) % 2 != 0 {
        return RespValue::error("wrong number of arguments for 'zadd' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    // Parse score-member pairs
    let mut members = Vec::with_capacity((args.len() - 1) / 2);
    for pair in args[1..].chunks_exact(2) {
        let score = match parse_strict_float(&pair[0]) {
            Some(s) => s,
            None => return RespValue::from(KvError::NotFloat),
        };
        members.push(ZMember::new(score, pair[1].clone()));
    }

    match db.zadd(key, &members) {
        Ok(count) => RespValue::Integer(count),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_zrem(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() < 2 {
        return RespValue::error("wrong number of arguments for 'zrem' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    let members: Vec<&[u8]> = args[1..].iter().map(|v| v.as_slice()).collect();

    match db.zrem(key, &members) {
        Ok(count) => RespValue::Integer(count),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_zscore(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() != 2 {
        return RespValue::error("wrong number of arguments for 'zscore' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.zscore(key, &args[1]) {
        Ok(Some(score)) => RespValue::BulkString(Some(format_score(score).into_bytes())),
        Ok(None) => RespValue::BulkString(None),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn cmd_zcard(db: &Db, args: &[Vec<u8>]) -> RespValue {
    if args.len() != 1 {
        return RespValue::error("wrong number of arguments for 'zcard' command");
    }

    let key = match std::str::from_utf8(&args[0]) {
        Ok(k) => k,
        Err(_) => return RespValue::error("invalid key"),
    };

    match db.zcard(key) {
        Ok(count) => RespValue::Integer(count),
        Err(KvError::WrongType) => RespValue::wrong_type(),
        Err(e) => RespValue::error(e.to_string()),
    }
}
