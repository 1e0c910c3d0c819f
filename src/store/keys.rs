use crate::store::StoreError;

const SEP: char = ':';

fn validate_id(entity: &str, id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::Validation(format!("{entity} id must not be empty")));
    }
    Ok(())
}

pub fn task_key(task_id: &str) -> Result<String, StoreError> {
    validate_id("task", task_id)?;
    Ok(task_id.to_string())
}

/// Flip the sign bit so that byte order matches numeric order for the whole
/// `i64` range, pre-epoch timestamps included.
fn encode_timestamp_ms(timestamp_ms: i64) -> u64 {
    (timestamp_ms as u64) ^ (1 << 63)
}

fn decode_timestamp_ms(encoded: u64) -> i64 {
    (encoded ^ (1 << 63)) as i64
}

/// `{deadline:020}:{task_id}`, ascending by deadline.
pub fn task_deadline_index_key(deadline_ms: i64, task_id: &str) -> Result<String, StoreError> {
    validate_id("task", task_id)?;
    Ok(format!(
        "{:020}{SEP}{}",
        encode_timestamp_ms(deadline_ms),
        task_id
    ))
}

/// Split a deadline index key back into `(deadline_ms, task_id)`.
///
/// The deadline prefix is digits only, so everything after the first
/// separator is the id, separators included.
pub fn parse_task_deadline_index_key(key: &[u8]) -> Option<(i64, &str)> {
    let sep = key.iter().position(|b| *b == SEP as u8)?;
    let ts = std::str::from_utf8(&key[..sep]).ok()?.parse::<u64>().ok()?;
    let task_id = std::str::from_utf8(&key[sep + 1..]).ok()?;
    if task_id.is_empty() {
        return None;
    }
    Some((decode_timestamp_ms(ts), task_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_index_orders_by_time_asc() {
        let earlier = task_deadline_index_key(1_000, "b").unwrap();
        let later = task_deadline_index_key(2_000, "a").unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn pre_epoch_deadlines_sort_first() {
        let before = task_deadline_index_key(-86_400_000, "t1").unwrap();
        let epoch = task_deadline_index_key(0, "t2").unwrap();
        let after = task_deadline_index_key(86_400_000, "t3").unwrap();
        assert!(before < epoch);
        assert!(epoch < after);
    }

    #[test]
    fn index_key_parses_back() {
        for ts in [i64::MIN, -1, 0, 1, 1_700_000_000_000, i64::MAX] {
            for id in ["task-42", "a:b", "tugas:2024:07"] {
                let key = task_deadline_index_key(ts, id).unwrap();
                assert_eq!(parse_task_deadline_index_key(key.as_bytes()), Some((ts, id)));
            }
        }
    }

    #[test]
    fn rejects_empty_ids() {
        assert!(matches!(task_key(""), Err(StoreError::Validation(_))));
        assert!(matches!(
            task_deadline_index_key(0, ""),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn ids_may_contain_separator() {
        assert_eq!(task_key("a:b").unwrap(), "a:b");
    }
}
