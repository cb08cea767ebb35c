//! Numeric `delta` (spec §4.2): parse the value as an unsigned decimal
//! integer, apply the signed delta saturating at zero, rewrite in place
//! when the new text fits the old length, otherwise reallocate.

use crate::clock::Clock;

use super::header::DeltaResult;
use super::manager::ItemManager;

impl<C: Clock> ItemManager<C> {
    pub fn delta(&mut self, key: &[u8], delta: i64) -> DeltaResult {
        let head = match self.hash.find(key) {
            Some(h) => h,
            None => return DeltaResult::NotFound,
        };
        let (chained, value, old_nbyte, exptime) = match self.chunk_at(head) {
            Some(it) => (it.flags.chained, it.value.clone(), it.nbyte as usize, it.exptime),
            None => return DeltaResult::NotFound,
        };
        if chained {
            return DeltaResult::Chained;
        }
        let text = match std::str::from_utf8(&value) {
            Ok(s) => s.trim(),
            Err(_) => return DeltaResult::NonNumeric,
        };
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return DeltaResult::NonNumeric;
        }
        let current: u64 = match text.parse() {
            Ok(v) => v,
            Err(_) => return DeltaResult::Overflow,
        };
        let new_val = if delta >= 0 {
            match current.checked_add(delta as u64) {
                Some(v) => v,
                None => return DeltaResult::Overflow,
            }
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        let new_text = new_val.to_string();
        if new_text.len() <= old_nbyte {
            let it = self.chunk_at_mut(head).expect("head exists");
            it.nbyte = new_text.len() as u32;
            it.value = new_text.into_bytes();
            return DeltaResult::Ok;
        }
        // New text no longer fits the original chunk; reallocate and relink.
        // The return-code taxonomy (spec §6) has no "no memory" case for
        // delta, so an allocation failure here — only possible for pathological
        // configurations where even a 20-digit number has no fitting class —
        // is reported as `Overflow`.
        match self.alloc(key, exptime, new_text.as_bytes()) {
            Some(new_head) => {
                self.set(new_head);
                self.remove(new_head);
                DeltaResult::Ok
            }
            None => DeltaResult::Overflow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;

    fn manager() -> ItemManager<ManualClock> {
        ItemManager::new(Config::scenario_default(), ManualClock::new(0))
    }

    #[test]
    fn increments_and_decrements_numeric_value() {
        let mut m = manager();
        let r = m.alloc(b"n", 0, b"10").unwrap();
        m.set(r);
        m.remove(r);
        assert_eq!(m.delta(b"n", 5), DeltaResult::Ok);
        let h = m.get(b"n").unwrap();
        assert_eq!(m.value_of(h), b"15");
        m.remove(h);
        assert_eq!(m.delta(b"n", -5), DeltaResult::Ok);
        let h = m.get(b"n").unwrap();
        assert_eq!(m.value_of(h), b"10");
        m.remove(h);
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let mut m = manager();
        let r = m.alloc(b"n", 0, b"3").unwrap();
        m.set(r);
        m.remove(r);
        assert_eq!(m.delta(b"n", -100), DeltaResult::Ok);
        let h = m.get(b"n").unwrap();
        assert_eq!(m.value_of(h), b"0");
        m.remove(h);
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let mut m = manager();
        let r = m.alloc(b"s", 0, b"hello").unwrap();
        m.set(r);
        m.remove(r);
        assert_eq!(m.delta(b"s", 1), DeltaResult::NonNumeric);
    }

    #[test]
    fn missing_key_is_not_found() {
        let mut m = manager();
        assert_eq!(m.delta(b"missing", 1), DeltaResult::NotFound);
    }

    #[test]
    fn chained_value_rejects_delta() {
        let mut m = manager();
        let value = vec![b'1'; 940];
        let r = m.alloc(b"big", 0, &value).unwrap();
        m.set(r);
        m.remove(r);
        assert_eq!(m.delta(b"big", 1), DeltaResult::Chained);
    }
}
