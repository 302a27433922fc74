//! Lifecycle Orchestrator: turns tree-diff operations into correctly ordered
//! hardware operations.
//!
//! Every node owns a [`Signal`] whose slot holds the completion of the latest
//! operation scheduled on it.  Each new operation awaits that completion
//! before running and then takes its place, which gives:
//!
//! - parent init before child init (a child's init awaits the parent's slot),
//! - at most one operation in flight per node,
//! - updates applied in the order they were scheduled,
//! - disposal strictly after whatever was in flight, never preempting it.
//!
//! Scheduling is synchronous; the operations themselves run as Tokio tasks.
//! Failures are logged against the node, broadcast as
//! [`NodePayload::Failed`] and handed to the node's error callback.  They
//! never stop reconciliation of unrelated nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::join_all;
use hertz_hal::{HardwareDriver, PeripheralCatalog, PeripheralInstance};
use hertz_types::{
    Attributes, ErrorCallback, HertzError, LifecycleState, NodeEvent, NodeId, NodePayload,
    Stage,
};
use parking_lot::Mutex;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::bus::EventBus;
use crate::registry::{AttachPoint, NodeRecord, SharedRegistry};
use crate::signal::{Completion, Signal};

type SignalMap = Arc<Mutex<HashMap<NodeId, Signal>>>;

/// Schedules init, update, command and disposal operations per node.
pub struct Orchestrator {
    registry: SharedRegistry,
    signals: SignalMap,
    catalog: PeripheralCatalog,
    driver: Arc<dyn HardwareDriver>,
    events: EventBus,
    next_id: AtomicU64,
}

/// Reports the outcome of one scheduled operation.
#[derive(Clone)]
struct Outcome {
    node: NodeId,
    kind: String,
    events: EventBus,
    on_error: Option<ErrorCallback>,
}

impl Outcome {
    fn report(&self, stage: Stage, result: &Result<(), HertzError>, success: NodePayload) {
        let payload = match result {
            Ok(()) => {
                debug!(node = %self.node, kind = %self.kind, %stage, "operation settled");
                success
            }
            Err(e) => {
                error!(node = %self.node, kind = %self.kind, %stage, error = %e, "operation failed");
                if let Some(callback) = &self.on_error {
                    callback(e);
                }
                NodePayload::Failed {
                    stage,
                    error: e.clone(),
                }
            }
        };
        // Nobody listening is normal.
        let _ = self
            .events
            .publish(NodeEvent::new(self.node, self.kind.clone(), payload));
    }
}

impl Orchestrator {
    pub fn new(
        registry: SharedRegistry,
        catalog: PeripheralCatalog,
        driver: Arc<dyn HardwareDriver>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            signals: Arc::new(Mutex::new(HashMap::new())),
            catalog,
            driver,
            events,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a node of `kind` with its creation attributes.
    ///
    /// The node's id and Signal are reserved immediately so children created
    /// in the same pass can already depend on it.  The node starts detached;
    /// attach it with [`Orchestrator::attach`] before scheduling its init.
    pub fn instantiate(&self, kind: &str, attributes: Attributes) -> Result<NodeId, HertzError> {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let instance = self
            .catalog
            .create(kind, id, &attributes, self.driver.clone())?;
        let record = NodeRecord::new(attributes, instance);

        self.signals.lock().insert(id, Signal::new(record.label()));
        self.registry.lock().insert(record);
        debug!(node = %id, kind, "node instantiated");
        Ok(id)
    }

    /// Attach `child` under `at`, at the end or right before `before`.
    /// Purely structural: it never triggers init again.
    pub fn attach(
        &self,
        at: AttachPoint,
        child: NodeId,
        before: Option<NodeId>,
    ) -> Result<(), HertzError> {
        let mut registry = self.registry.lock();
        match before {
            Some(before) => registry.insert_before(at, child, before),
            None => registry.append(at, child),
        }
    }

    /// Detach every child of `at` without disposing anything.
    pub fn clear(&self, at: AttachPoint) -> Result<Vec<NodeId>, HertzError> {
        self.registry.lock().clear(at)
    }

    /// Schedule the node's init after its parent's Signal settles.
    ///
    /// Init is the peripheral's one-time setup followed by the mount apply of
    /// its creation attributes.  Updates scheduled before init carry their
    /// own `prev → next` difference and run after it.  Scheduling twice is a
    /// no-op.
    pub fn schedule_init(&self, id: NodeId) -> Result<(), HertzError> {
        let registry = self.registry.lock();
        let record = registry.get(id).ok_or(HertzError::UnknownNode(id))?;
        let mut signals = self.signals.lock();

        let parent = match record.parent {
            Some(parent) => signals.get(&parent).map(|s| (parent, s.current())),
            None => None,
        };
        let signal = signals.get_mut(&id).ok_or(HertzError::UnknownNode(id))?;
        if signal.is_removing() {
            return Err(HertzError::NodeRemoved(id));
        }
        let Some(sender) = signal.claim_init() else {
            return Ok(());
        };

        let instance = record.instance.clone();
        let attributes = record.created.clone();
        let label = record.label();
        let outcome = self.outcome(record);
        let span = info_span!("hertz.init", node = %id, kind = %record.kind);
        drop(signals);
        drop(registry);

        tokio::spawn(
            async move {
                let result = match parent {
                    Some((parent, parent_done)) => match parent_done.await {
                        Ok(()) => mount(instance.as_ref(), &attributes).await,
                        Err(e) => Err(HertzError::Initialization {
                            component: label,
                            details: format!("parent {parent} failed: {e}"),
                        }),
                    },
                    None => mount(instance.as_ref(), &attributes).await,
                };
                outcome.report(Stage::Init, &result, NodePayload::Ready);
                let _ = sender.send(result);
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Record `next` as the node's attributes and apply the `prev → next`
    /// difference once every earlier operation on the node has settled.
    pub fn schedule_update(
        &self,
        id: NodeId,
        prev: Attributes,
        next: Attributes,
    ) -> Result<(), HertzError> {
        let mut registry = self.registry.lock();
        let mut signals = self.signals.lock();
        let signal = signals.get_mut(&id).ok_or(HertzError::UnknownNode(id))?;
        if signal.is_removing() {
            return Err(HertzError::NodeRemoved(id));
        }
        let record = registry.get_mut(id).ok_or(HertzError::UnknownNode(id))?;
        record.attributes = next.clone();

        let instance = record.instance.clone();
        let outcome = self.outcome(record);
        let span = info_span!("hertz.update", node = %id, kind = %record.kind);
        let previous = signal.current();

        let op = async move {
            let _ = previous.await;
            let result = instance.apply_props(&prev, &next).await;
            outcome.report(Stage::Update, &result, NodePayload::Updated);
            result
        }
        .instrument(span)
        .boxed()
        .shared();

        signal.advance(op.clone());
        tokio::spawn(op);
        Ok(())
    }

    /// Run the named one-shot command once every earlier operation on the
    /// node has settled.
    pub fn schedule_command(&self, id: NodeId, name: &str) -> Result<(), HertzError> {
        let registry = self.registry.lock();
        let mut signals = self.signals.lock();
        let signal = signals.get_mut(&id).ok_or(HertzError::UnknownNode(id))?;
        if signal.is_removing() {
            return Err(HertzError::NodeRemoved(id));
        }
        let record = registry.get(id).ok_or(HertzError::UnknownNode(id))?;

        let instance = record.instance.clone();
        let outcome = self.outcome(record);
        let span = info_span!("hertz.command", node = %id, kind = %record.kind, command = name);
        let previous = signal.current();
        let name = name.to_string();

        let op = async move {
            let _ = previous.await;
            let result = instance.command(&name).await;
            outcome.report(Stage::Command, &result, NodePayload::CommandCompleted(name));
            result
        }
        .instrument(span)
        .boxed()
        .shared();

        signal.advance(op.clone());
        tokio::spawn(op);
        Ok(())
    }

    /// Detach `id` from `from` and dispose its whole subtree, children first.
    ///
    /// Each node's disposal runs after its own in-flight operation and after
    /// its children's disposals.  Once it settles the node leaves the registry
    /// and its Signal is discarded.  Returns the completion of `id`'s own
    /// disposal, which therefore covers the entire subtree.
    pub fn schedule_remove(&self, from: AttachPoint, id: NodeId) -> Result<Completion, HertzError> {
        let mut registry = self.registry.lock();
        let mut signals = self.signals.lock();

        let record = registry.get(id).ok_or(HertzError::UnknownNode(id))?;
        let signal = signals.get(&id).ok_or(HertzError::UnknownNode(id))?;
        if signal.is_removing() {
            return Err(HertzError::NodeRemoved(id));
        }
        let attached = match record.parent {
            Some(parent) => AttachPoint::Node(parent),
            None => AttachPoint::Container,
        };
        if attached != from {
            warn!(node = %id, ?from, ?attached, "removing node from a different parent than declared");
        }
        registry.detach(id)?;

        let mut disposals: HashMap<NodeId, Completion> = HashMap::new();
        for node in registry.subtree(id) {
            let Some(record) = registry.get(node) else {
                continue;
            };
            let Some(signal) = signals.get_mut(&node) else {
                continue;
            };
            if !signal.begin_removal() {
                continue;
            }
            if !signal.init_scheduled() {
                signal.abandon_init();
            }

            let children: Vec<Completion> = record
                .children
                .iter()
                .filter_map(|child| disposals.get(child).cloned())
                .collect();
            let instance = record.instance.clone();
            let outcome = self.outcome(record);
            let span = info_span!("hertz.dispose", node = %node, kind = %record.kind);
            let previous = signal.current();
            let registry_handle = self.registry.clone();
            let signals_handle = self.signals.clone();

            let op = async move {
                let _ = previous.await;
                join_all(children).await;
                let result = dispose(instance.as_ref()).await;
                outcome.report(Stage::Dispose, &result, NodePayload::Disposed);
                registry_handle.lock().purge(node);
                signals_handle.lock().remove(&node);
                result
            }
            .instrument(span)
            .boxed()
            .shared();

            signal.advance(op.clone());
            disposals.insert(node, op.clone());
            tokio::spawn(op);
        }

        disposals
            .remove(&id)
            .ok_or(HertzError::NodeRemoved(id))
    }

    /// Completion of the latest operation scheduled on `id`, or `None` once
    /// the node is gone.
    pub fn settled(&self, id: NodeId) -> Option<Completion> {
        self.signals.lock().get(&id).map(Signal::current)
    }

    /// Lifecycle state of the node's peripheral instance.
    pub fn state(&self, id: NodeId) -> Option<LifecycleState> {
        self.registry.lock().get(id).map(|r| r.instance.state())
    }

    /// Latest declared attributes of the node.
    pub fn attributes(&self, id: NodeId) -> Option<Attributes> {
        self.registry.lock().get(id).map(|r| r.attributes.clone())
    }

    /// Remove every top-level subtree and wait until all disposals settled.
    pub async fn shutdown(&self) {
        let top_level = self.registry.lock().top_level();
        let mut pending = Vec::new();
        for id in top_level {
            // Top-level nodes have no parent, whether attached or not.
            match self.schedule_remove(AttachPoint::Container, id) {
                Ok(done) => pending.push(done),
                // Already being removed: wait for that disposal instead.
                Err(HertzError::NodeRemoved(_)) => pending.extend(self.settled(id)),
                Err(e) => warn!(node = %id, error = %e, "could not schedule removal"),
            }
        }
        join_all(pending).await;
    }

    fn outcome(&self, record: &NodeRecord) -> Outcome {
        Outcome {
            node: record.id,
            kind: record.kind.clone(),
            events: self.events.clone(),
            on_error: record.attributes.on_error.clone(),
        }
    }
}

// Init: one-time setup, then the first apply of the creation attributes.
async fn mount(instance: &dyn PeripheralInstance, attributes: &Attributes) -> Result<(), HertzError> {
    instance.initialize().await?;
    instance.apply_props(&Attributes::default(), attributes).await
}

async fn dispose(instance: &dyn PeripheralInstance) -> Result<(), HertzError> {
    match instance.state() {
        // Already gone, e.g. torn down directly by its owner.
        LifecycleState::Disposed => Ok(()),
        _ => instance.dispose().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use hertz_hal::VelocityCommand;
    use hertz_hal::sim::{DriverCommand, SimDriver, Target};
    use hertz_types::PinMode;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn orchestrator(driver: &Arc<SimDriver>) -> Orchestrator {
        Orchestrator::new(
            NodeRegistry::shared(),
            PeripheralCatalog::with_builtin(),
            driver.clone(),
            EventBus::default(),
        )
    }

    fn attrs(value: Value) -> Attributes {
        Attributes::from_json(value)
    }

    fn position(commands: &[DriverCommand], wanted: &DriverCommand) -> usize {
        commands
            .iter()
            .position(|c| c == wanted)
            .unwrap_or_else(|| panic!("{wanted:?} not issued in {commands:?}"))
    }

    /// Instantiate, attach and init a node, then wait for init to settle.
    async fn mount_node(
        orch: &Orchestrator,
        at: AttachPoint,
        kind: &str,
        props: Value,
    ) -> NodeId {
        let id = orch.instantiate(kind, attrs(props)).unwrap();
        orch.attach(at, id, None).unwrap();
        orch.schedule_init(id).unwrap();
        orch.settled(id).unwrap().await.unwrap();
        id
    }

    #[tokio::test]
    async fn parent_init_precedes_child_init() {
        let driver = SimDriver::builder()
            .with_latency(Duration::from_millis(5))
            .build();
        let orch = orchestrator(&driver);

        let parent = orch
            .instantiate("dpinout", attrs(json!({"pin": 1, "value": true})))
            .unwrap();
        let child = orch.instantiate("dpinout", attrs(json!({"pin": 2}))).unwrap();
        orch.attach(AttachPoint::Container, parent, None).unwrap();
        orch.attach(AttachPoint::Node(parent), child, None).unwrap();

        // Child first: it must still wait for the parent.
        orch.schedule_init(child).unwrap();
        orch.schedule_init(parent).unwrap();
        orch.settled(child).unwrap().await.unwrap();

        let commands = driver.commands();
        let parent_mounted = position(&commands, &DriverCommand::WritePin { pin: 1, value: true });
        let child_setup = position(
            &commands,
            &DriverCommand::SetPinMode { pin: 2, mode: PinMode::DigitalOutput },
        );
        assert!(parent_mounted < child_setup);
        assert_eq!(orch.state(parent), Some(LifecycleState::Ready));
        assert_eq!(orch.state(child), Some(LifecycleState::Ready));
    }

    #[tokio::test]
    async fn schedule_init_is_idempotent() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let id = orch.instantiate("dpinin", attrs(json!({"pin": 6}))).unwrap();
        orch.schedule_init(id).unwrap();
        orch.schedule_init(id).unwrap();
        orch.settled(id).unwrap().await.unwrap();
        orch.schedule_init(id).unwrap();
        orch.settled(id).unwrap().await.unwrap();

        assert_eq!(
            driver.commands(),
            vec![DriverCommand::SetPinMode { pin: 6, mode: PinMode::DigitalInput }]
        );
    }

    #[tokio::test]
    async fn one_operation_in_flight_per_node() {
        let driver = SimDriver::builder()
            .with_latency(Duration::from_millis(2))
            .build();
        let orch = orchestrator(&driver);
        let id = mount_node(&orch, AttachPoint::Container, "dpinout", json!({"pin": 3})).await;
        driver.take_commands();

        let levels = [true, false, true, false, true];
        let mut prev = orch.attributes(id).unwrap();
        for level in levels {
            let next = prev.with_prop("value", json!(level));
            orch.schedule_update(id, prev, next.clone()).unwrap();
            prev = next;
        }
        orch.settled(id).unwrap().await.unwrap();

        let writes: Vec<DriverCommand> = levels
            .iter()
            .map(|&value| DriverCommand::WritePin { pin: 3, value })
            .collect();
        assert_eq!(driver.commands(), writes);
        assert_eq!(driver.peak_concurrency(Target::Pin(3)), 1);
        assert_eq!(driver.pin_level(3), Some(true));
        assert_eq!(orch.attributes(id).unwrap().props["value"], json!(true));
    }

    #[tokio::test]
    async fn update_scheduled_before_init_waits_for_it() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let created = attrs(json!({"pin": 5}));
        let id = orch.instantiate("dpinout", created.clone()).unwrap();

        orch.schedule_update(id, created.clone(), created.with_prop("value", json!(true)))
            .unwrap();
        orch.schedule_init(id).unwrap();
        orch.settled(id).unwrap().await.unwrap();

        // Init mounts the creation attributes; the update writes once.
        assert_eq!(
            driver.commands(),
            vec![
                DriverCommand::SetPinMode { pin: 5, mode: PinMode::DigitalOutput },
                DriverCommand::WritePin { pin: 5, value: true },
            ]
        );
        assert_eq!(driver.pin_level(5), Some(true));
        assert_eq!(orch.attributes(id).unwrap().props["value"], json!(true));
    }

    #[tokio::test]
    async fn motor_update_queued_before_init_drives_once() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let created = attrs(json!({
            "port": 0,
            "target": {"targetVelocity": 1000, "acceleration": 500}
        }));
        let id = orch.instantiate("motor", created.clone()).unwrap();

        let faster =
            created.with_prop("target", json!({"targetVelocity": 2000, "acceleration": 500}));
        orch.schedule_update(id, created, faster).unwrap();
        orch.schedule_init(id).unwrap();
        orch.settled(id).unwrap().await.unwrap();

        assert_eq!(
            driver.commands(),
            vec![
                DriverCommand::StopMotor(0),
                DriverCommand::SetVelocity(VelocityCommand {
                    port: 0,
                    velocity: 1000,
                    acceleration: 500,
                }),
                DriverCommand::StopMotor(0),
                DriverCommand::SetVelocity(VelocityCommand {
                    port: 0,
                    velocity: 2000,
                    acceleration: 500,
                }),
            ]
        );
        assert_eq!(driver.motor(0).velocity, 2000);
    }

    #[tokio::test]
    async fn motor_velocity_stop_scenario() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let spinning = json!({
            "port": 0,
            "enabled": true,
            "target": {"targetVelocity": 1000, "acceleration": 500}
        });
        let id = mount_node(&orch, AttachPoint::Container, "motor", spinning.clone()).await;
        assert!(driver.motor(0).moving);
        driver.take_commands();

        let prev = attrs(spinning);
        let next = prev.with_prop("target", json!({"targetVelocity": 0, "acceleration": 500}));
        orch.schedule_update(id, prev, next).unwrap();
        orch.settled(id).unwrap().await.unwrap();

        let commands = driver.commands();
        assert_eq!(commands, vec![DriverCommand::StopMotor(0)]);
        assert!(
            !commands
                .iter()
                .any(|c| matches!(c, DriverCommand::SetVelocity(_)))
        );
        assert!(!driver.motor(0).moving);
    }

    #[tokio::test]
    async fn removal_waits_for_pending_update_and_disowns_once() {
        let driver = SimDriver::builder()
            .with_latency(Duration::from_millis(2))
            .build();
        let orch = orchestrator(&driver);
        let id = mount_node(&orch, AttachPoint::Container, "dpinout", json!({"pin": 4})).await;
        driver.take_commands();

        let prev = orch.attributes(id).unwrap();
        orch.schedule_update(id, prev.clone(), prev.with_prop("value", json!(true)))
            .unwrap();
        let removed = orch.schedule_remove(AttachPoint::Container, id).unwrap();
        removed.await.unwrap();

        assert_eq!(
            driver.commands(),
            vec![
                DriverCommand::WritePin { pin: 4, value: true },
                DriverCommand::WritePin { pin: 4, value: false },
            ]
        );
        assert!(!orch.registry().lock().contains(id));
        assert_eq!(orch.registry().lock().live_len(), 0);
        assert!(orch.settled(id).is_none());
        assert_eq!(
            orch.schedule_update(id, prev.clone(), prev),
            Err(HertzError::UnknownNode(id))
        );
    }

    #[tokio::test]
    async fn subtree_is_disposed_children_first() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let parent = mount_node(
            &orch,
            AttachPoint::Container,
            "dpinout",
            json!({"pin": 1, "value": true}),
        )
        .await;
        let child = mount_node(
            &orch,
            AttachPoint::Node(parent),
            "dpinout",
            json!({"pin": 2, "value": true}),
        )
        .await;
        let grandchild = mount_node(
            &orch,
            AttachPoint::Node(child),
            "dpinout",
            json!({"pin": 3, "value": true}),
        )
        .await;
        driver.take_commands();

        let mut events = orch.events().subscribe();
        orch.schedule_remove(AttachPoint::Container, parent)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            driver.commands(),
            vec![
                DriverCommand::WritePin { pin: 3, value: false },
                DriverCommand::WritePin { pin: 2, value: false },
                DriverCommand::WritePin { pin: 1, value: false },
            ]
        );
        assert!(orch.registry().lock().is_empty());

        let mut disposed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if matches!(event.payload, NodePayload::Disposed) {
                disposed.push(event.node);
            }
        }
        assert_eq!(disposed, vec![grandchild, child, parent]);
    }

    #[tokio::test]
    async fn removal_is_scheduled_at_most_once() {
        let driver = SimDriver::builder()
            .with_latency(Duration::from_millis(2))
            .build();
        let orch = orchestrator(&driver);
        let id = mount_node(&orch, AttachPoint::Container, "motor", json!({"port": 1, "enabled": true}))
            .await;
        let attrs = orch.attributes(id).unwrap();

        let removed = orch.schedule_remove(AttachPoint::Container, id).unwrap();
        assert!(matches!(
            orch.schedule_remove(AttachPoint::Container, id),
            Err(HertzError::NodeRemoved(_))
        ));
        assert_eq!(
            orch.schedule_update(id, attrs.clone(), attrs),
            Err(HertzError::NodeRemoved(id))
        );
        assert_eq!(
            orch.schedule_command(id, "setHome"),
            Err(HertzError::NodeRemoved(id))
        );
        removed.await.unwrap();

        let disables = driver
            .commands()
            .iter()
            .filter(|c| **c == DriverCommand::DisableMotor(1))
            .count();
        assert_eq!(disables, 1);
    }

    #[tokio::test]
    async fn failed_parent_fails_child_and_spares_sibling() {
        let driver = SimDriver::builder().with_fault(Target::Pin(1)).build();
        let orch = orchestrator(&driver);
        let mut events = orch.events().subscribe();

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let parent = orch.instantiate("dpinout", attrs(json!({"pin": 1}))).unwrap();
        let child = orch
            .instantiate(
                "dpinout",
                attrs(json!({"pin": 2})).on_error(move |e| sink.lock().push(e.clone())),
            )
            .unwrap();
        let sibling = orch.instantiate("dpinout", attrs(json!({"pin": 3}))).unwrap();
        orch.attach(AttachPoint::Container, parent, None).unwrap();
        orch.attach(AttachPoint::Node(parent), child, None).unwrap();
        orch.attach(AttachPoint::Container, sibling, None).unwrap();
        for id in [parent, child, sibling] {
            orch.schedule_init(id).unwrap();
        }

        assert!(orch.settled(parent).unwrap().await.is_err());
        let child_err = orch.settled(child).unwrap().await.unwrap_err();
        orch.settled(sibling).unwrap().await.unwrap();

        match &child_err {
            HertzError::Initialization { component, details } => {
                assert_eq!(component, "dpinout#1");
                assert!(details.contains("#0"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*reported.lock(), vec![child_err]);
        assert_eq!(orch.state(sibling), Some(LifecycleState::Ready));
        assert_eq!(orch.state(child), Some(LifecycleState::Uninitialized));
        assert!(
            !driver
                .commands()
                .iter()
                .any(|c| c.target() == Target::Pin(2))
        );

        let mut failed = Vec::new();
        let mut ready = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event.payload {
                NodePayload::Failed { stage: Stage::Init, .. } => failed.push(event.node),
                NodePayload::Ready => ready.push(event.node),
                _ => {}
            }
        }
        failed.sort();
        assert_eq!(failed, vec![parent, child]);
        assert_eq!(ready, vec![sibling]);
    }

    #[tokio::test]
    async fn removing_before_init_never_touches_hardware() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let parent = orch.instantiate("dpinout", attrs(json!({"pin": 1, "value": true}))).unwrap();
        let child = orch.instantiate("dpinout", attrs(json!({"pin": 2, "value": true}))).unwrap();
        orch.attach(AttachPoint::Container, parent, None).unwrap();
        orch.attach(AttachPoint::Node(parent), child, None).unwrap();
        // The child waits on a parent whose init is never scheduled.
        orch.schedule_init(child).unwrap();
        let child_init = orch.settled(child).unwrap();

        orch.schedule_remove(AttachPoint::Container, parent)
            .unwrap()
            .await
            .unwrap();

        assert!(matches!(
            child_init.await,
            Err(HertzError::Initialization { .. })
        ));
        assert!(driver.commands().is_empty());
        assert!(orch.registry().lock().is_empty());
    }

    #[tokio::test]
    async fn commands_run_in_schedule_order() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let id = mount_node(&orch, AttachPoint::Container, "motor", json!({"port": 0})).await;
        let prev = orch.attributes(id).unwrap();
        let next = prev.with_prop(
            "target",
            json!({"targetPosition": 300, "targetVelocity": 100, "acceleration": 10}),
        );
        orch.schedule_update(id, prev, next).unwrap();
        orch.schedule_command(id, "setHome").unwrap();
        orch.settled(id).unwrap().await.unwrap();

        let commands = driver.commands();
        assert_eq!(commands.last(), Some(&DriverCommand::HomeMotor(0)));
        assert_eq!(driver.motor(0).position, 0);

        let mut events = orch.events().subscribe();
        orch.schedule_command(id, "jog").unwrap();
        let err = orch.settled(id).unwrap().await.unwrap_err();
        assert!(matches!(err, HertzError::UnsupportedCommand { .. }));
        let event = events.try_recv().unwrap();
        assert!(matches!(
            event.payload,
            NodePayload::Failed { stage: Stage::Command, .. }
        ));
    }

    #[tokio::test]
    async fn shutdown_disposes_every_node() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        let motor = mount_node(
            &orch,
            AttachPoint::Container,
            "motor",
            json!({"port": 2, "enabled": true}),
        )
        .await;
        mount_node(&orch, AttachPoint::Node(motor), "dpinin", json!({"pin": 8})).await;
        // Never attached anywhere.
        orch.instantiate("dpinout", attrs(json!({"pin": 9}))).unwrap();
        driver.take_commands();

        orch.shutdown().await;

        assert!(orch.registry().lock().is_empty());
        assert_eq!(
            driver.commands(),
            vec![DriverCommand::StopMotor(2), DriverCommand::DisableMotor(2)]
        );
    }

    #[tokio::test]
    async fn unknown_kinds_and_nodes_are_rejected() {
        let driver = SimDriver::new();
        let orch = orchestrator(&driver);
        assert_eq!(
            orch.instantiate("servo", Attributes::default()),
            Err(HertzError::UnknownPeripheral("servo".to_string()))
        );
        assert_eq!(
            orch.schedule_init(NodeId(99)),
            Err(HertzError::UnknownNode(NodeId(99)))
        );
        assert!(orch.settled(NodeId(99)).is_none());
    }
}
