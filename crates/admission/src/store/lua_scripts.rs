//! Lua scripts for atomic counter operations.
//!
//! Each script runs as a single Redis command, so concurrent instances never
//! observe a half-applied update.

/// Increment a fixed-window counter.
///
/// Arguments:
/// - KEYS[1]: Window key (e.g., `ratelimit:{key}:fixed:{window}`)
/// - ARGV[1]: Window TTL in milliseconds
///
/// Returns the new count. The TTL is applied only when the counter is first
/// created.
pub const INCREMENT_WINDOW: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Refill and take from a token bucket.
///
/// Arguments:
/// - KEYS[1]: Bucket key (e.g., `ratelimit:global:bucket`)
/// - ARGV[1]: Capacity
/// - ARGV[2]: Refill rate (tokens per second)
/// - ARGV[3]: Tokens requested
/// - ARGV[4]: Current time in milliseconds
/// - ARGV[5]: Bucket TTL in milliseconds
///
/// Returns `{allowed, remaining}`:
/// - allowed: 1 if the tokens were taken, 0 otherwise
/// - remaining: whole tokens left in the bucket
pub const TOKEN_BUCKET: &str = r"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local state = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])

if tokens == nil or ts == nil then
    -- New bucket starts full
    tokens = capacity
    ts = now
end

local elapsed = now - ts
if elapsed < 0 then
    elapsed = 0
end

tokens = math.min(capacity, tokens + (elapsed * rate / 1000))

local allowed = 0
if tokens >= requested then
    tokens = tokens - requested
    allowed = 1
end

redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'ts', tostring(now))
redis.call('PEXPIRE', KEYS[1], ttl)

return {allowed, math.floor(tokens)}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_contain_expected_commands() {
        assert!(INCREMENT_WINDOW.contains("INCR"));
        assert!(INCREMENT_WINDOW.contains("PEXPIRE"));

        assert!(TOKEN_BUCKET.contains("HMGET"));
        assert!(TOKEN_BUCKET.contains("HSET"));
        assert!(TOKEN_BUCKET.contains("PEXPIRE"));
        assert!(TOKEN_BUCKET.contains("math.floor"));
    }

    #[test]
    fn test_increment_window_expires_only_new_counters() {
        // The expiry must be guarded by the first-increment check so later
        // hits never push the window boundary out.
        let guard = INCREMENT_WINDOW
            .find("if count == 1")
            .unwrap_or(usize::MAX);
        let expire = INCREMENT_WINDOW.find("PEXPIRE").unwrap_or(0);
        assert!(guard < expire);
    }

    #[test]
    fn test_token_bucket_clamps_refill_to_capacity() {
        assert!(TOKEN_BUCKET.contains("math.min(capacity"));
    }

    #[test]
    fn test_script_length() {
        assert!(INCREMENT_WINDOW.len() > 50);
        assert!(INCREMENT_WINDOW.len() < 500);

        assert!(TOKEN_BUCKET.len() > 200);
        assert!(TOKEN_BUCKET.len() < 2000);
    }
}
