use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard, OnceLock};

static BUCKET: OnceLock<Mutex<SnowflakeIdBucket>> = OnceLock::new();

fn bucket() -> MutexGuard<'static, SnowflakeIdBucket> {
    BUCKET
        .get_or_init(|| Mutex::new(SnowflakeIdBucket::new(1, 1)))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Configures the generator's machine and node identifiers (0-31 each).
///
/// Ids generated before the first call use machine 1 / node 1.
pub fn init(machine_id: i32, node_id: i32) {
    *bucket() = SnowflakeIdBucket::new(machine_id, node_id);
}

/// Returns a fresh snowflake id rendered as a decimal string.
pub fn next_id() -> String {
    bucket().get_id().to_string()
}
