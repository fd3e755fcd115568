//! Lua bodies for the atomic multi-key operations
//!
//! These three scripts encapsulate every cross-key consistency requirement
//! in the system; the in-memory broker reproduces the same semantics under
//! a single lock.

/// Conditional pop-and-push between sorted sets.
///
/// ```text
/// KEYS[1] src zset        ARGV[1] count
/// KEYS[2] dst zset        ARGV[2] max score, or "+inf" for unbounded
/// KEYS[3] src status set  ARGV[3] new score
/// KEYS[4] dst status set  ARGV[4] queue name
/// ```
///
/// KEYS[3..4]/ARGV[4] are present only when status-set bookkeeping was
/// requested. Returns the moved members in ascending score order.
pub const ZPOPPUSH_SCRIPT: &str = r#"
local src = KEYS[1]
local dst = KEYS[2]
local count = tonumber(ARGV[1])
local max_score = ARGV[2]
local new_score = ARGV[3]

local members
if max_score == '+inf' then
    members = redis.call('ZRANGE', src, 0, count - 1)
else
    members = redis.call('ZRANGEBYSCORE', src, '-inf', max_score, 'LIMIT', 0, count)
end

if #members == 0 then
    return members
end

for _, member in ipairs(members) do
    redis.call('ZREM', src, member)
    redis.call('ZADD', dst, new_score, member)
end

if #KEYS >= 4 then
    redis.call('SADD', KEYS[4], ARGV[4])
    if redis.call('ZCARD', src) == 0 then
        redis.call('SREM', KEYS[3], ARGV[4])
    end
end

return members
"#;

/// Remove ARGV[1] from the set at KEYS[1] iff the sorted set at KEYS[2]
/// is empty. Returns the number of members removed.
pub const SREM_IF_NOT_EXISTS_SCRIPT: &str = r#"
if redis.call('ZCARD', KEYS[2]) == 0 then
    return redis.call('SREM', KEYS[1], ARGV[1])
end
return 0
"#;

/// Delete KEYS[1] iff ARGV[1] is not a member of any sorted set in
/// KEYS[2..]. Returns the number of keys deleted.
pub const DELETE_IF_NOT_IN_ZSETS_SCRIPT: &str = r#"
for i = 2, #KEYS do
    if redis.call('ZSCORE', KEYS[i], ARGV[1]) then
        return 0
    end
end
return redis.call('DEL', KEYS[1])
"#;
