use serde_json::Value;

/// What a synchronous event hook decided about the action that fired it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Allow,
    Veto,
}

impl EventOutcome {
    /// Interprets a raw interpreter return value: zero allows, anything else
    /// vetoes.
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            EventOutcome::Allow
        } else {
            EventOutcome::Veto
        }
    }

    pub fn is_veto(self) -> bool {
        self == EventOutcome::Veto
    }
}

/// Boundary to the embedded script interpreter.
///
/// With `wait` set, the hook runs synchronously and its return value can veto
/// the triggering action. Without it, the call may be enqueued and the return
/// value is meaningless.
pub trait ScriptBridge: Send + Sync {
    fn trigger_event(&self, name: &str, args: &[Value], wait: bool) -> EventOutcome;
}

/// Bridge used when no interpreter is attached; every action is allowed.
pub struct NoScripts;

impl ScriptBridge for NoScripts {
    fn trigger_event(&self, _name: &str, _args: &[Value], _wait: bool) -> EventOutcome {
        EventOutcome::Allow
    }
}
