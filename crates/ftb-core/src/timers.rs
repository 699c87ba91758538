use std::{collections::HashMap, sync::RwLock};

use crate::domain::CategoryId;

#[derive(Debug, Default)]
struct TimerState {
    global: u64,
    overrides: HashMap<CategoryId, u64>,
}

/// Process-local mirror of the persisted timers.
///
/// Filled once at startup from the storage channels and kept warm by the record
/// store's writes. Never expires on its own.
#[derive(Debug)]
pub struct TimerRegistry {
    state: RwLock<TimerState>,
}

impl TimerRegistry {
    pub fn new(default_global: u64) -> Self {
        Self {
            state: RwLock::new(TimerState {
                global: default_global,
                overrides: HashMap::new(),
            }),
        }
    }

    pub fn global(&self) -> u64 {
        self.read(|st| st.global)
    }

    pub fn set_global(&self, seconds: u64) {
        self.write(|st| st.global = seconds);
    }

    pub fn override_for(&self, id: &CategoryId) -> Option<u64> {
        self.read(|st| st.overrides.get(id).copied())
    }

    pub fn set_override(&self, id: &CategoryId, seconds: u64) {
        self.write(|st| {
            st.overrides.insert(id.clone(), seconds);
        });
    }

    pub fn forget(&self, id: &CategoryId) {
        self.write(|st| {
            st.overrides.remove(id);
        });
    }

    /// Replace every override at once (startup scan).
    pub fn load_overrides(&self, overrides: HashMap<CategoryId, u64>) {
        self.write(|st| st.overrides = overrides);
    }

    /// Effective TTL: the category override, else the global value right now.
    pub fn resolve(&self, id: &CategoryId) -> u64 {
        self.read(|st| st.overrides.get(id).copied().unwrap_or(st.global))
    }

    fn read<T>(&self, f: impl FnOnce(&TimerState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut TimerState)) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

/// Admin timer input: whole seconds, negatives clamp to 0 (permanent).
pub fn parse_seconds(input: &str) -> Option<u64> {
    let n = input.trim().parse::<i64>().ok()?;
    Some(u64::try_from(n).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_is_late_binding_for_categories_without_override() {
        let reg = TimerRegistry::new(3600);
        let a = CategoryId::from("a");
        let b = CategoryId::from("b");
        reg.set_override(&b, 0);

        assert_eq!(reg.resolve(&a), 3600);
        reg.set_global(60);
        assert_eq!(reg.resolve(&a), 60);
        assert_eq!(reg.resolve(&b), 0);

        reg.forget(&b);
        assert_eq!(reg.resolve(&b), 60);
        assert_eq!(reg.override_for(&b), None);
    }

    #[test]
    fn load_overrides_replaces_previous_state() {
        let reg = TimerRegistry::new(10);
        reg.set_override(&CategoryId::from("old"), 5);
        reg.load_overrides(HashMap::from([(CategoryId::from("new"), 7)]));
        assert_eq!(reg.override_for(&CategoryId::from("old")), None);
        assert_eq!(reg.resolve(&CategoryId::from("new")), 7);
    }

    #[test]
    fn timer_input_clamps_negatives() {
        assert_eq!(parse_seconds(" 3600 "), Some(3600));
        assert_eq!(parse_seconds("-5"), Some(0));
        assert_eq!(parse_seconds("ten"), None);
        assert_eq!(parse_seconds("1.5"), None);
    }
}
