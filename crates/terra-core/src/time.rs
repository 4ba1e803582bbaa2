use std::time::{SystemTime, UNIX_EPOCH};

pub type EpochMillis = u64;

pub fn now_epoch_millis() -> EpochMillis {
    to_epoch_millis(SystemTime::now())
}

pub fn to_epoch_millis(time: SystemTime) -> EpochMillis {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    duration.as_millis() as EpochMillis
}
