//! Redis-backed queue shared by API processes and workers.
//!
//! Layout under a configurable prefix (default `execution-queue`):
//!
//! | Key | Type | Contents |
//! |---|---|---|
//! | `{prefix}:job:{id}` | hash | payload, state, attempt, priority, seq, timestamps, last error |
//! | `{prefix}:wait` | zset | visible jobs scored by [`wait_score`] |
//! | `{prefix}:delayed` | zset | retries scored by due time (ms) |
//! | `{prefix}:active` | zset | claimed jobs scored by claim time (ms) |
//! | `{prefix}:completed` / `{prefix}:failed` | zset | finished jobs scored by finish time (ms) |
//! | `{prefix}:seq` | string | enqueue counter |
//!
//! Every state transition is a single Lua script so concurrent workers
//! never observe a half-moved job.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use codearena_core::{Clock, JobAttempt, SubmissionId, SubmissionJob, Timestamp};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::policy::{RetentionPolicy, RetryPolicy};
use crate::types::{
    ClaimedJob, EnqueueReceipt, FailOutcome, JobRecord, JobState, QueueStats, StalledJob,
};
use crate::{JobQueue, QueueError, STALLED_ERROR};

pub const DEFAULT_QUEUE_NAME: &str = "execution-queue";

/// Priorities are clamped to this magnitude so wait scores stay exact in
/// a double.
pub const MAX_PRIORITY_MAGNITUDE: i32 = 1 << 20;

const SEQ_SHIFT: f64 = 4_294_967_296.0;

/// Sort key of a waiting job: lower is claimed first.
pub fn wait_score(priority: i32, seq: u64) -> f64 {
    let priority = priority.clamp(-MAX_PRIORITY_MAGNITUDE, MAX_PRIORITY_MAGNITUDE);
    -f64::from(priority) * SEQ_SHIFT + seq as f64
}

/// Key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    pub fn job(&self, id: &SubmissionId) -> String {
        format!("{}{}", self.job_prefix(), id)
    }

    pub fn bucket(&self, state: JobState) -> String {
        let name = match state {
            JobState::Waiting => "wait",
            other => other.as_str(),
        };
        format!("{}:{name}", self.prefix)
    }

    pub fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }
}

fn to_ms(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> Option<Timestamp> {
    DateTime::from_timestamp_millis(ms)
}

/// Rebuild a [`JobRecord`] from the fields of its job hash.
pub fn record_from_fields(
    id: &SubmissionId,
    fields: &HashMap<String, String>,
) -> Result<JobRecord, QueueError> {
    let corrupt = |reason: &str| QueueError::Corrupt {
        id: id.clone(),
        reason: reason.to_string(),
    };
    let field = |name: &'static str| {
        fields
            .get(name)
            .ok_or_else(|| corrupt(&format!("missing field '{name}'")))
    };
    let int = |name: &'static str| -> Result<i64, QueueError> {
        field(name)?
            .parse::<i64>()
            .map_err(|_| corrupt(&format!("field '{name}' is not an integer")))
    };
    let time = |name: &'static str| -> Result<Timestamp, QueueError> {
        from_ms(int(name)?).ok_or_else(|| corrupt(&format!("field '{name}' is out of range")))
    };

    let job: SubmissionJob = serde_json::from_str(field("payload")?)?;
    let state = JobState::parse(field("state")?).ok_or_else(|| corrupt("unknown state"))?;
    let attempt_number =
        u32::try_from(int("attempt")?).map_err(|_| corrupt("attempt out of range"))?;
    let backoff_delay = fields
        .get("backoff_ms")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO);

    Ok(JobRecord {
        job,
        state,
        attempt: JobAttempt {
            attempt_number,
            scheduled_at: time("scheduled_at")?,
            backoff_delay,
        },
        seq: u64::try_from(int("seq")?).map_err(|_| corrupt("seq out of range"))?,
        enqueued_at: time("enqueued_at")?,
        finished_at: fields
            .get("finished_at")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(from_ms),
        last_error: fields.get("error").cloned(),
    })
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// KEYS: job, wait, seq. ARGV: payload, priority, now_ms, id.
const ENQUEUE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return {0, tonumber(redis.call('HGET', KEYS[1], 'attempt')),
          tonumber(redis.call('HGET', KEYS[1], 'scheduled_at')),
          tonumber(redis.call('HGET', KEYS[1], 'backoff_ms') or '0')}
end
local seq = redis.call('INCR', KEYS[3])
local priority = tonumber(ARGV[2])
redis.call('HSET', KEYS[1],
  'payload', ARGV[1], 'state', 'waiting', 'attempt', 1, 'priority', priority,
  'seq', seq, 'scheduled_at', ARGV[3], 'enqueued_at', ARGV[3], 'backoff_ms', 0)
redis.call('ZADD', KEYS[2], -priority * 4294967296 + seq, ARGV[4])
return {1, 1, tonumber(ARGV[3]), 0}
"#;

/// KEYS: wait, delayed, active. ARGV: now_ms, job key prefix.
const CLAIM: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  local key = ARGV[2] .. id
  redis.call('ZREM', KEYS[2], id)
  local score = -tonumber(redis.call('HGET', key, 'priority')) * 4294967296
                + tonumber(redis.call('HGET', key, 'seq'))
  redis.call('ZADD', KEYS[1], score, id)
  redis.call('HSET', key, 'state', 'waiting')
end
local head = redis.call('ZRANGE', KEYS[1], 0, 0)
if #head == 0 then
  return false
end
local id = head[1]
local key = ARGV[2] .. id
redis.call('ZREM', KEYS[1], id)
redis.call('ZADD', KEYS[3], ARGV[1], id)
redis.call('HSET', key, 'state', 'active')
return redis.call('HMGET', key, 'payload', 'attempt', 'scheduled_at', 'backoff_ms')
"#;

/// KEYS: job, active, completed. ARGV: id, now_ms.
const COMPLETE: &str = r#"
if redis.call('ZREM', KEYS[2], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'state', 'completed', 'finished_at', ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
return 1
"#;

/// KEYS: job, active, delayed, failed.
/// ARGV: id, now_ms, max_attempts, base_delay_ms, error.
/// Returns {-1} if not active, {1, next_attempt, delay_ms} on retry,
/// {0, attempts} when exhausted.
const FAIL: &str = r#"
if redis.call('ZREM', KEYS[2], ARGV[1]) == 0 then
  return {-1}
end
local attempt = tonumber(redis.call('HGET', KEYS[1], 'attempt'))
redis.call('HSET', KEYS[1], 'error', ARGV[5])
if attempt < tonumber(ARGV[3]) then
  local delay = tonumber(ARGV[4]) * (2 ^ (attempt - 1))
  local due = tonumber(ARGV[2]) + delay
  redis.call('HSET', KEYS[1], 'state', 'delayed', 'attempt', attempt + 1,
             'scheduled_at', due, 'backoff_ms', delay)
  redis.call('ZADD', KEYS[3], due, ARGV[1])
  return {1, attempt + 1, delay}
end
redis.call('HSET', KEYS[1], 'state', 'failed', 'finished_at', ARGV[2])
redis.call('ZADD', KEYS[4], ARGV[2], ARGV[1])
return {0, attempt}
"#;

/// KEYS: active, delayed, failed.
/// ARGV: cutoff_ms, now_ms, max_attempts, base_delay_ms, job key prefix, error.
/// Returns one {id, 1, next_attempt, delay_ms} or {id, 0, attempts, 0} per
/// job claimed before the cutoff.
const RECOVER_STALLED: &str = r#"
local out = {}
for _, id in ipairs(redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])) do
  local key = ARGV[5] .. id
  redis.call('ZREM', KEYS[1], id)
  local attempt = tonumber(redis.call('HGET', key, 'attempt'))
  redis.call('HSET', key, 'error', ARGV[6])
  if attempt < tonumber(ARGV[3]) then
    local delay = tonumber(ARGV[4]) * (2 ^ (attempt - 1))
    local due = tonumber(ARGV[2]) + delay
    redis.call('HSET', key, 'state', 'delayed', 'attempt', attempt + 1,
               'scheduled_at', due, 'backoff_ms', delay)
    redis.call('ZADD', KEYS[2], due, id)
    table.insert(out, {id, 1, attempt + 1, delay})
  else
    redis.call('HSET', key, 'state', 'failed', 'finished_at', ARGV[2])
    redis.call('ZADD', KEYS[3], ARGV[2], id)
    table.insert(out, {id, 0, attempt, 0})
  end
end
return out
"#;

/// KEYS: finished bucket. ARGV: max_count, cutoff_ms, job key prefix.
const TRIM: &str = r#"
local removed = 0
local old = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[2])
for _, id in ipairs(old) do
  redis.call('DEL', ARGV[3] .. id)
  redis.call('ZREM', KEYS[1], id)
  removed = removed + 1
end
local excess = redis.call('ZCARD', KEYS[1]) - tonumber(ARGV[1])
if excess > 0 then
  for _, id in ipairs(redis.call('ZRANGE', KEYS[1], 0, excess - 1)) do
    redis.call('DEL', ARGV[3] .. id)
    redis.call('ZREM', KEYS[1], id)
    removed = removed + 1
  end
end
return removed
"#;

struct Scripts {
    enqueue: Script,
    claim: Script,
    complete: Script,
    fail: Script,
    recover_stalled: Script,
    trim: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE),
            claim: Script::new(CLAIM),
            complete: Script::new(COMPLETE),
            fail: Script::new(FAIL),
            recover_stalled: Script::new(RECOVER_STALLED),
            trim: Script::new(TRIM),
        }
    }
}

// ---------------------------------------------------------------------------
// RedisQueue
// ---------------------------------------------------------------------------

pub struct RedisQueue {
    conn: ConnectionManager,
    keys: QueueKeys,
    scripts: Scripts,
    retry: RetryPolicy,
    keep_completed: RetentionPolicy,
    keep_failed: RetentionPolicy,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("keys", &self.keys)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, queue_name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            keys: QueueKeys::new(queue_name),
            scripts: Scripts::load(),
            retry: RetryPolicy::default(),
            keep_completed: RetentionPolicy::completed(),
            keep_failed: RetentionPolicy::failed(),
            clock,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn trim(&self, state: JobState, policy: RetentionPolicy) -> Result<u64, QueueError> {
        let cutoff = self.clock.now() - policy.max_age_chrono();
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .scripts
            .trim
            .key(self.keys.bucket(state))
            .arg(policy.max_count)
            .arg(to_ms(cutoff))
            .arg(self.keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    fn attempt_from_parts(
        &self,
        id: &SubmissionId,
        attempt: i64,
        scheduled_ms: i64,
        backoff_ms: i64,
    ) -> Result<JobAttempt, QueueError> {
        let corrupt = |reason: &str| QueueError::Corrupt {
            id: id.clone(),
            reason: reason.to_string(),
        };
        Ok(JobAttempt {
            attempt_number: u32::try_from(attempt).map_err(|_| corrupt("attempt out of range"))?,
            scheduled_at: from_ms(scheduled_ms).ok_or_else(|| corrupt("bad schedule"))?,
            backoff_delay: Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(0)),
        })
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: SubmissionJob) -> Result<EnqueueReceipt, QueueError> {
        let id = job.submission_id.clone();
        let payload = serde_json::to_string(&job)?;
        let priority = job
            .priority
            .clamp(-MAX_PRIORITY_MAGNITUDE, MAX_PRIORITY_MAGNITUDE);
        let mut conn = self.conn.clone();

        let (created, attempt, scheduled_ms, backoff_ms): (i64, i64, i64, i64) = self
            .scripts
            .enqueue
            .key(self.keys.job(&id))
            .key(self.keys.bucket(JobState::Waiting))
            .key(self.keys.seq())
            .arg(payload)
            .arg(priority)
            .arg(to_ms(self.clock.now()))
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;

        Ok(EnqueueReceipt {
            attempt: self.attempt_from_parts(&id, attempt, scheduled_ms, backoff_ms)?,
            duplicate: created == 0,
        })
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let mut conn = self.conn.clone();
        let claimed: Option<(String, i64, i64, Option<i64>)> = self
            .scripts
            .claim
            .key(self.keys.bucket(JobState::Waiting))
            .key(self.keys.bucket(JobState::Delayed))
            .key(self.keys.bucket(JobState::Active))
            .arg(to_ms(self.clock.now()))
            .arg(self.keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;

        let Some((payload, attempt, scheduled_ms, backoff_ms)) = claimed else {
            return Ok(None);
        };
        let job: SubmissionJob = serde_json::from_str(&payload)?;
        let attempt =
            self.attempt_from_parts(&job.submission_id, attempt, scheduled_ms, backoff_ms.unwrap_or(0))?;
        Ok(Some(ClaimedJob { job, attempt }))
    }

    async fn complete(&self, id: &SubmissionId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .scripts
            .complete
            .key(self.keys.job(id))
            .key(self.keys.bucket(JobState::Active))
            .key(self.keys.bucket(JobState::Completed))
            .arg(id.as_str())
            .arg(to_ms(self.clock.now()))
            .invoke_async(&mut conn)
            .await?;
        if moved == 0 {
            return Err(QueueError::NotActive(id.clone()));
        }
        self.trim(JobState::Completed, self.keep_completed).await?;
        Ok(())
    }

    async fn fail(&self, id: &SubmissionId, error: &str) -> Result<FailOutcome, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .scripts
            .fail
            .key(self.keys.job(id))
            .key(self.keys.bucket(JobState::Active))
            .key(self.keys.bucket(JobState::Delayed))
            .key(self.keys.bucket(JobState::Failed))
            .arg(id.as_str())
            .arg(to_ms(now))
            .arg(self.retry.max_attempts)
            .arg(self.retry.base_delay.as_millis() as u64)
            .arg(error)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [1, next, delay_ms] => {
                let delay = Duration::from_millis(u64::try_from(*delay_ms).unwrap_or(0));
                let next = self.attempt_from_parts(id, *next, to_ms(now) + delay_ms, *delay_ms)?;
                Ok(FailOutcome::Retrying { next, delay })
            }
            [0, attempts] => {
                self.trim(JobState::Failed, self.keep_failed).await?;
                Ok(FailOutcome::Exhausted {
                    attempts: u32::try_from(*attempts).unwrap_or(u32::MAX),
                })
            }
            _ => Err(QueueError::NotActive(id.clone())),
        }
    }

    async fn recover_stalled(&self) -> Result<Vec<StalledJob>, QueueError> {
        let now = self.clock.now();
        let cutoff = now - self.retry.stall_timeout_chrono();
        let mut conn = self.conn.clone();
        let rows: Vec<(String, i64, i64, i64)> = self
            .scripts
            .recover_stalled
            .key(self.keys.bucket(JobState::Active))
            .key(self.keys.bucket(JobState::Delayed))
            .key(self.keys.bucket(JobState::Failed))
            .arg(to_ms(cutoff))
            .arg(to_ms(now))
            .arg(self.retry.max_attempts)
            .arg(self.retry.base_delay.as_millis() as u64)
            .arg(self.keys.job_prefix())
            .arg(STALLED_ERROR)
            .invoke_async(&mut conn)
            .await?;

        let mut stalled = Vec::with_capacity(rows.len());
        let mut exhausted = false;
        for (id, retrying, number, delay_ms) in rows {
            let id = SubmissionId::new(id);
            let outcome = if retrying == 1 {
                let next = self.attempt_from_parts(&id, number, to_ms(now) + delay_ms, delay_ms)?;
                FailOutcome::Retrying {
                    next,
                    delay: Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0)),
                }
            } else {
                exhausted = true;
                FailOutcome::Exhausted {
                    attempts: u32::try_from(number).unwrap_or(u32::MAX),
                }
            };
            stalled.push(StalledJob {
                submission_id: id,
                outcome,
            });
        }
        if exhausted {
            self.trim(JobState::Failed, self.keep_failed).await?;
        }
        Ok(stalled)
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let completed = self.trim(JobState::Completed, self.keep_completed).await?;
        let failed = self.trim(JobState::Failed, self.keep_failed).await?;
        Ok(completed + failed)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn.clone();
        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .zcard(self.keys.bucket(JobState::Waiting))
            .zcard(self.keys.bucket(JobState::Delayed))
            .zcard(self.keys.bucket(JobState::Active))
            .zcard(self.keys.bucket(JobState::Completed))
            .zcard(self.keys.bucket(JobState::Failed))
            .query_async(&mut conn)
            .await?;
        Ok(QueueStats {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn get(&self, id: &SubmissionId) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.keys.job(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        record_from_fields(id, &fields).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use codearena_core::{Language, PRIORITY_BACKGROUND, PRIORITY_NORMAL, PRIORITY_URGENT};

    use super::*;

    #[test]
    fn key_layout() {
        let keys = QueueKeys::new(DEFAULT_QUEUE_NAME);
        assert_eq!(keys.job(&SubmissionId::new("s-1")), "execution-queue:job:s-1");
        assert_eq!(keys.bucket(JobState::Waiting), "execution-queue:wait");
        assert_eq!(keys.bucket(JobState::Failed), "execution-queue:failed");
        assert_eq!(keys.seq(), "execution-queue:seq");
    }

    #[test]
    fn wait_score_orders_priority_then_seq() {
        let mut jobs = [
            ("bg", wait_score(PRIORITY_BACKGROUND, 1)),
            ("a", wait_score(PRIORITY_NORMAL, 2)),
            ("urgent", wait_score(PRIORITY_URGENT, 3)),
            ("b", wait_score(PRIORITY_NORMAL, 4)),
        ];
        jobs.sort_by(|x, y| x.1.total_cmp(&y.1));
        let order: Vec<_> = jobs.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, ["urgent", "a", "b", "bg"]);
    }

    #[test]
    fn extreme_priorities_are_clamped() {
        assert_eq!(
            wait_score(i32::MAX, 7),
            wait_score(MAX_PRIORITY_MAGNITUDE, 7)
        );
        assert!(wait_score(i32::MIN, 0) > wait_score(0, u32::MAX as u64));
    }

    #[test]
    fn record_is_rebuilt_from_hash_fields() {
        let id = SubmissionId::new("s-1");
        let job = SubmissionJob::new(id.clone(), "p-1", Language::Cpp, "int main(){}", vec![]);
        let fields: HashMap<String, String> = [
            ("payload", serde_json::to_string(&job).unwrap()),
            ("state", "delayed".into()),
            ("attempt", "2".into()),
            ("priority", "0".into()),
            ("seq", "41".into()),
            ("scheduled_at", "1700000041000".into()),
            ("enqueued_at", "1700000040000".into()),
            ("backoff_ms", "1000".into()),
            ("error", "boom".into()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let record = record_from_fields(&id, &fields).unwrap();
        assert_eq!(record.job, job);
        assert_eq!(record.state, JobState::Delayed);
        assert_eq!(record.attempt.attempt_number, 2);
        assert_eq!(record.attempt.backoff_delay, Duration::from_secs(1));
        assert_eq!(
            record.attempt.scheduled_at - record.enqueued_at,
            chrono::Duration::seconds(1)
        );
        assert_eq!(record.finished_at, None);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn missing_fields_are_reported_as_corrupt() {
        let id = SubmissionId::new("s-1");
        let fields = HashMap::from([("state".to_string(), "waiting".to_string())]);
        assert!(matches!(
            record_from_fields(&id, &fields),
            Err(QueueError::Corrupt { .. })
        ));
    }
}
