//! Pattern-delete script.

/// Cursor-driven SCAN over the keyspace, UNLINKing every key matching
/// `ARGV[1]`, `ARGV[2]` keys per batch. Returns the number removed.
pub const DELETE_BY_PATTERN_SCRIPT: &str = r#"local cursor = "0"
local removed = 0
repeat
    local page = redis.call("SCAN", cursor, "MATCH", ARGV[1], "COUNT", ARGV[2])
    cursor = page[1]
    for _, key in ipairs(page[2]) do
        removed = removed + redis.call("UNLINK", key)
    end
until cursor == "0"
return removed"#;

/// SCAN batch size passed to the script.
pub const DELETE_BATCH: u32 = 1000;
