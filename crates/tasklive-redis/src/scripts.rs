//! Server-side mutation scripts.
//!
//! Each script writes the document, keeps the indexes in step and appends the
//! change-stream entry in one atomic step, so stream order is commit order.
//! Document values travel as JSON text and are compared as text.
//!
//! Stream entries get explicit ids `<n>-0` from a dedicated counter, so ids are
//! contiguous and a gap left by trimming can be measured.

use redis::Script;

/// KEYS: doc, all, owner, seq, changes, change seq
/// ARGV: id, maxlen, document json, field, value, ...
const INSERT: &str = r#"
local seq = redis.call('INCR', KEYS[4])
local entry = redis.call('INCR', KEYS[6]) .. '-0'
for i = 4, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('ZADD', KEYS[2], seq, ARGV[1])
redis.call('ZADD', KEYS[3], seq, ARGV[1])
return redis.call('XADD', KEYS[5], 'MAXLEN', '~', ARGV[2], entry,
  'op', 'insert', 'id', ARGV[1], 'doc', ARGV[3])
"#;

/// KEYS: doc, all, changes, change seq
/// ARGV: id, maxlen, owner key prefix, field, value, ...
/// Returns {matched, modified, token or nil, changed fields json or nil}.
const UPDATE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {0, 0, false, false}
end
local old_owner = redis.call('HGET', KEYS[1], 'email') or 'null'
local parts = {}
for i = 4, #ARGV, 2 do
  if redis.call('HGET', KEYS[1], ARGV[i]) ~= ARGV[i + 1] then
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
    parts[#parts + 1] = cjson.encode(ARGV[i]) .. ':' .. ARGV[i + 1]
  end
end
if #parts == 0 then
  return {1, 0, false, false}
end
local new_owner = redis.call('HGET', KEYS[1], 'email') or 'null'
if new_owner ~= old_owner then
  local seq = redis.call('ZSCORE', KEYS[2], ARGV[1])
  redis.call('ZREM', ARGV[3] .. old_owner, ARGV[1])
  redis.call('ZADD', ARGV[3] .. new_owner, seq, ARGV[1])
end
local fields = '{' .. table.concat(parts, ',') .. '}'
local entry = redis.call('INCR', KEYS[4]) .. '-0'
local token = redis.call('XADD', KEYS[3], 'MAXLEN', '~', ARGV[2], entry,
  'op', 'update', 'id', ARGV[1], 'fields', fields)
return {1, 1, token, fields}
"#;

/// KEYS: doc, all, changes, change seq
/// ARGV: id, maxlen, owner key prefix
/// Returns {deleted, token or nil}.
const DELETE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {0, false}
end
local owner = redis.call('HGET', KEYS[1], 'email') or 'null'
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', ARGV[3] .. owner, ARGV[1])
local entry = redis.call('INCR', KEYS[4]) .. '-0'
local token = redis.call('XADD', KEYS[3], 'MAXLEN', '~', ARGV[2], entry,
  'op', 'delete', 'id', ARGV[1])
return {1, token}
"#;

/// Loaded once per store; `redis::Script` caches by SHA and falls back to
/// EVAL when the server has not seen the script yet.
pub struct Scripts {
    pub insert: Script,
    pub update: Script,
    pub delete: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            insert: Script::new(INSERT),
            update: Script::new(UPDATE),
            delete: Script::new(DELETE),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}
