use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Ids look like `task_1709816400000_k3j9x2m4q`: a creation timestamp in epoch
/// millis plus nine base36 characters. The suffix mixes the sub-second clock
/// with a process-local counter, so ids minted in the same millisecond stay
/// distinct.
pub fn new_task_id(now_millis: i64) -> String {
    format!("task_{now_millis}_{}", suffix())
}

pub fn new_record_id(now_millis: i64) -> String {
    format!("rec_{now_millis}_{}", suffix())
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = (nanos ^ count.rotate_left(32))
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .rotate_left(29)
        .wrapping_mul(0xD1B5_4A32_D192_ED03);
    base36(mixed)
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = [0u8; 9];
    for slot in out.iter_mut() {
        *slot = DIGITS[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ids_carry_prefix_millis_and_suffix() {
        let id = new_task_id(1_709_816_400_000);
        let mut parts = id.splitn(3, '_');
        assert_eq!(parts.next(), Some("task"));
        assert_eq!(parts.next(), Some("1709816400000"));
        let suffix = parts.next().unwrap();
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        assert!(new_record_id(42).starts_with("rec_42_"));
    }

    #[test]
    fn ids_minted_in_the_same_millisecond_differ() {
        let ids: HashSet<String> = (0..200).map(|_| new_record_id(1_709_816_400_000)).collect();
        assert_eq!(ids.len(), 200);
    }
}
