use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Пул, хранящий один `Arc<str>` на имя канала для всех брокеров.
static CHANNEL_INTERN: Lazy<DashMap<Arc<str>, ()>> = Lazy::new(DashMap::new);

/// Возвращает interned `Arc<str>` для `chan`, при первом вызове создаёт его.
#[inline]
pub(crate) fn intern_channel<S: AsRef<str>>(chan: S) -> Arc<str> {
    let key = chan.as_ref();
    if let Some(existing) = CHANNEL_INTERN.get(key) {
        return existing.key().clone();
    }
    CHANNEL_INTERN
        .entry(Arc::from(key))
        .or_insert(())
        .key()
        .clone()
}

/// Удаляет `name` из пула, если на него больше никто не ссылается.
pub(crate) fn release(name: &str) -> bool {
    CHANNEL_INTERN
        .remove_if(name, |interned, _| Arc::strong_count(interned) == 1)
        .is_some()
}

#[cfg(test)]
pub(crate) fn is_interned(name: &str) -> bool {
    CHANNEL_INTERN.contains_key(name)
}

/// Удаляет имена, на которые ссылается только сам пул. Возвращает число
/// освобождённых имён.
pub(crate) fn release_unused() -> usize {
    let before = CHANNEL_INTERN.len();
    CHANNEL_INTERN.retain(|name, _| Arc::strong_count(name) > 1);
    before.saturating_sub(CHANNEL_INTERN.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Проверяет, что повторный вызов возвращает тот же самый `Arc`.
    #[test]
    fn intern_new_and_repeats() {
        let a1 = intern_channel("intern.kin");
        assert_eq!(&*a1, "intern.kin");
        let a2 = intern_channel(String::from("intern.kin"));
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[test]
    fn intern_different_keys() {
        let a1 = intern_channel("intern.dzadza");
        let a2 = intern_channel("intern.maz");
        assert!(!Arc::ptr_eq(&a1, &a2));
    }

    /// Проверяет, что при конкурентных вызовах для одного имени возвращается один `Arc`.
    #[test]
    fn intern_concurrent() {
        let keys = ["intern.a", "intern.b", "intern.a", "intern.a"];
        let handles: Vec<_> = keys
            .iter()
            .map(|&k| std::thread::spawn(move || intern_channel(k)))
            .collect();
        let arcs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for arc in arcs.iter().filter(|arc| arc.as_ref() == "intern.a") {
            assert!(Arc::ptr_eq(&arcs[0], arc));
        }
    }

    /// Проверяет, что имя освобождается только после ухода последнего владельца.
    #[test]
    fn release_single_name() {
        let held = intern_channel("intern.single");
        assert!(!release("intern.single"));
        assert!(is_interned("intern.single"));

        drop(held);
        assert!(release("intern.single"));
        assert!(!is_interned("intern.single"));
        assert!(!release("intern.never"));
    }

    /// Проверяет, что используемое имя переживает очистку, а отпущенное
    /// создаётся заново.
    #[test]
    fn release_keeps_names_in_use() {
        let held = intern_channel("intern.held");
        release_unused();
        assert!(Arc::ptr_eq(&held, &intern_channel("intern.held")));

        drop(intern_channel("intern.dropped"));
        release_unused();
        assert!(!CHANNEL_INTERN.contains_key("intern.dropped"));
    }
}
