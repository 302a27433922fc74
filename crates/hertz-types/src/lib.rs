use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Declared attributes of a node, keyed by attribute name.
///
/// Insertion order is preserved so attribute application follows the order
/// in which the declaration listed them.
pub type PropMap = serde_json::Map<String, Value>;

/// Stable identifier of a node in the declared topology.  Assigned
/// monotonically and never reused within one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a peripheral instance.
///
/// `Uninitialized → Initializing → Ready ⇄ Updating`, then
/// `Disposing → Disposed` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Updating,
    Disposing,
    Disposed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Updating => "updating",
            LifecycleState::Disposing => "disposing",
            LifecycleState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Direction of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    DigitalInput,
    DigitalOutput,
}

/// Snapshot of a motor axis as reported by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotorState {
    /// Absolute position in steps from home.
    pub position: i64,
    /// Commanded velocity in steps per second.
    pub velocity: i64,
    pub enabled: bool,
    pub moving: bool,
    pub fault: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Attributes
// ─────────────────────────────────────────────────────────────────────────────

/// Observer fired by change detection with the new value and whether this is
/// the first read since initialization.
pub type ChangeCallback = Arc<dyn Fn(&Value, bool) + Send + Sync>;

/// Observer fired when an operation on the node fails.
pub type ErrorCallback = Arc<dyn Fn(&HertzError) + Send + Sync>;

/// Everything a declaration attaches to one node: writable props, change
/// observers keyed by observable name, and an optional error observer.
#[derive(Clone, Default)]
pub struct Attributes {
    pub props: PropMap,
    pub observers: HashMap<String, ChangeCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Attributes {
    pub fn new(props: PropMap) -> Self {
        Self {
            props,
            ..Self::default()
        }
    }

    /// Build from a JSON object literal.  Non-object values yield empty props.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(props) => Self::new(props),
            _ => Self::default(),
        }
    }

    /// Register an observer for the observable named `key`.
    pub fn on_change<F>(mut self, key: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Value, bool) + Send + Sync + 'static,
    {
        self.observers.insert(key.into(), Arc::new(callback));
        self
    }

    /// Register an observer for failed operations on this node.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HertzError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Return a copy with `key` set to `value`, keeping observers.
    pub fn with_prop(&self, key: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.props.insert(key.into(), value);
        next
    }

    /// Return a copy without `key`, keeping observers.
    pub fn without_prop(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.props.shift_remove(key);
        next
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut observed: Vec<&String> = self.observers.keys().collect();
        observed.sort();
        f.debug_struct("Attributes")
            .field("props", &self.props)
            .field("observers", &observed)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle events
// ─────────────────────────────────────────────────────────────────────────────

/// Which scheduled operation an event or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Update,
    Command,
    Dispose,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Update => "update",
            Stage::Command => "command",
            Stage::Dispose => "dispose",
        };
        f.write_str(s)
    }
}

/// Outcome of a scheduled operation, broadcast to observers of the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub node: NodeId,
    /// Peripheral type tag, e.g. `"motor"`.
    pub kind: String,
    pub payload: NodePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum NodePayload {
    Ready,
    Updated,
    CommandCompleted(String),
    Failed { stage: Stage, error: HertzError },
    Disposed,
}

impl NodeEvent {
    pub fn new(node: NodeId, kind: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            node,
            kind: kind.into(),
            payload,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared by the driver, peripheral and reconciliation layers.
///
/// Failures travel through per-node completion signals that several waiters
/// may observe, so the type is `Clone` and carries only owned text.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HertzError {
    #[error("Initialization of {component} failed: {details}")]
    Initialization { component: String, details: String },

    #[error("{component} is not initialized (state: {state})")]
    NotInitialized {
        component: String,
        state: LifecycleState,
    },

    #[error("Update of {component} failed on `{key}`: {details}")]
    Update {
        component: String,
        key: String,
        details: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{component} has been disposed")]
    Disposed { component: String },

    #[error("Unknown peripheral type: {0}")]
    UnknownPeripheral(String),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is being removed")]
    NodeRemoved(NodeId),

    #[error("Invalid topology: {0}")]
    Topology(String),

    #[error("{component} does not support command `{command}`")]
    UnsupportedCommand { component: String, command: String },

    #[error("Event channel error: {0}")]
    Channel(String),
}

impl HertzError {
    /// `true` for failures raised by the hardware transport itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, HertzError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn props_preserve_declaration_order() {
        let attrs = Attributes::from_json(json!({"port": 0, "enabled": true, "target": {}}));
        let keys: Vec<&String> = attrs.props.keys().collect();
        assert_eq!(keys, ["port", "enabled", "target"]);
    }

    #[test]
    fn with_and_without_prop_keep_observers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        let attrs = Attributes::from_json(json!({"pin": 1}))
            .on_change("value", move |_, _| {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            });

        let next = attrs.with_prop("value", json!(true)).without_prop("pin");
        assert_eq!(next.props.get("value"), Some(&json!(true)));
        assert!(next.props.get("pin").is_none());

        (next.observers["value"])(&json!(true), true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attributes_debug_lists_observed_keys() {
        let attrs = Attributes::from_json(json!({"pin": 3}))
            .on_change("value", |_, _| {})
            .on_error(|_| {});
        let debug = format!("{attrs:?}");
        assert!(debug.contains("\"value\""));
        assert!(debug.contains("on_error: true"));
    }

    #[test]
    fn non_object_json_yields_empty_props() {
        assert!(Attributes::from_json(json!([1, 2])).props.is_empty());
    }

    #[test]
    fn node_event_roundtrip() {
        let event = NodeEvent::new(
            NodeId(7),
            "motor",
            NodePayload::Failed {
                stage: Stage::Init,
                error: HertzError::Transport("serial timeout".to_string()),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: NodeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node, NodeId(7));
        assert!(matches!(
            back.payload,
            NodePayload::Failed { stage: Stage::Init, error: HertzError::Transport(_) }
        ));
    }

    #[test]
    fn hertz_error_display() {
        let err = HertzError::Update {
            component: "motor#3".to_string(),
            key: "target".to_string(),
            details: "Acceleration must be positive".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("motor#3"));
        assert!(text.contains("`target`"));

        let err = HertzError::NotInitialized {
            component: "dpinout#1".to_string(),
            state: LifecycleState::Initializing,
        };
        assert!(err.to_string().contains("initializing"));
        assert!(HertzError::Transport("x".into()).is_transport());
    }

    #[test]
    fn motor_state_serializes_camel_case_fields() {
        let state = MotorState {
            position: 10,
            velocity: -5,
            enabled: true,
            moving: true,
            fault: false,
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["position"], json!(10));
        assert_eq!(value["moving"], json!(true));
    }
}
