//! The CONCORD coordination bus.
//!
//! Every operation follows the same shape:
//!
//!   lock state → validate / route / sweep → collect events → unlock → publish
//!
//! All mutable maps (mailboxes, agent states, pending responses, retry
//! entries, healing flags) live in one `BusState` behind one mutex. A
//! health-triggered redistribution therefore runs start to finish without a
//! concurrent `send_message` touching the same agent, and events are only
//! published once the state they describe is committed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use concord_contracts::{
    agent::{AgentId, AgentState, AgentStateUpdate, AgentStatus, HealthStatus},
    config::BusConfig,
    error::{CoordError, CoordResult},
    event::BusEvent,
    message::{AgentMessage, MessageDraft, MessageId, Priority, Receiver},
    payload::{
        AlertKind, BlockerType, ConflictDetails, ConflictType, EscalationLevel, Inquiry,
        MessagePayload, Redistribution, Severity, StatusUpdate, SystemAlert, TaskAssignment,
    },
    task::{TaskRef, TaskStatus},
};

use crate::{
    health::{self, HealthSweep, Liveness},
    local::{LocalTransport, SimulatedRestart},
    mailbox::MailboxStore,
    retry::{RetryEntry, RetryOutcome, RetryQueue},
    schedule::{PeriodicJob, Schedule},
    tracker::ResponseTracker,
    traits::{AgentSupervisor, CapabilityDirectory, Clock, EscalationPolicy, HistoryStore, Transport},
};

/// Sender id of messages the bus originates itself (redistributed tasks,
/// healing alerts). Never registered as an agent.
pub const SYSTEM_SENDER: &str = "coordination-bus";

const SELF_HEALING_CONTEXT: &str = "self-healing";

fn system_sender() -> AgentId {
    AgentId::new(SYSTEM_SENDER)
}

fn is_system(agent_id: &AgentId) -> bool {
    agent_id.as_str() == SYSTEM_SENDER
}

/// The bus id is reserved for sending; nothing can be delivered to it.
fn addresses_system(receiver: &Receiver) -> bool {
    match receiver {
        Receiver::Unicast(id) => is_system(id),
        Receiver::Multicast(ids) => ids.iter().any(is_system),
        Receiver::Broadcast => false,
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct BusState {
    mailboxes: MailboxStore,
    /// Ordered so broadcasts and health sweeps visit agents deterministically.
    agents: BTreeMap<AgentId, AgentState>,
    /// Latest assignment body per task id, reused when the task moves.
    task_payloads: HashMap<String, TaskAssignment>,
    tracker: ResponseTracker,
    retries: RetryQueue,
    /// Every message id routed inside the retention window, with first-seen time.
    known_ids: HashMap<MessageId, DateTime<Utc>>,
    /// Agents between unhealthy detection and a successful restart.
    healing: HashSet<AgentId>,
    schedule: Schedule,
    shut_down: bool,
}

impl BusState {
    /// The agent's state, created on first contact.
    fn agent_mut(&mut self, agent_id: &AgentId, now: DateTime<Utc>) -> &mut AgentState {
        self.agents.entry(agent_id.clone()).or_insert_with(|| {
            debug!(agent_id = %agent_id, "first contact, tracking new agent");
            AgentState::new(agent_id.clone(), now)
        })
    }
}

// ── Bus ───────────────────────────────────────────────────────────────────────

/// The in-process message bus shared by every collaborator.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
/// `send_message` never blocks on a receiver: it returns once the message is
/// queued, and answers arrive as separate reply messages.
pub struct CoordinationBus {
    config: BusConfig,
    clock: Arc<dyn Clock>,
    escalation: Arc<dyn EscalationPolicy>,
    capabilities: Arc<dyn CapabilityDirectory>,
    history: Box<dyn HistoryStore>,
    transport: Box<dyn Transport>,
    supervisor: Box<dyn AgentSupervisor>,
    state: Mutex<BusState>,
    events: RwLock<Option<broadcast::Sender<BusEvent>>>,
}

impl CoordinationBus {
    /// Create a bus with in-process delivery and simulated restarts.
    ///
    /// Every agent listed by `capabilities.agents()` is registered up front
    /// with a heartbeat of `clock.now()`.
    pub fn new(
        config: BusConfig,
        clock: Arc<dyn Clock>,
        escalation: Arc<dyn EscalationPolicy>,
        capabilities: Arc<dyn CapabilityDirectory>,
        history: Box<dyn HistoryStore>,
    ) -> Self {
        let now = clock.now();
        let agents = capabilities
            .agents()
            .into_iter()
            .filter(|id| !is_system(id))
            .map(|id| (id.clone(), AgentState::new(id, now)))
            .collect::<BTreeMap<_, _>>();

        info!(agents = agents.len(), "coordination bus starting");

        let (sender, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let state = BusState {
            mailboxes: MailboxStore::new(),
            agents,
            task_payloads: HashMap::new(),
            tracker: ResponseTracker::new(),
            retries: RetryQueue::new(),
            known_ids: HashMap::new(),
            healing: HashSet::new(),
            schedule: Schedule::new(now, &config),
            shut_down: false,
        };

        Self {
            config,
            clock,
            escalation,
            capabilities,
            history,
            transport: Box::new(LocalTransport),
            supervisor: Box::new(SimulatedRestart),
            state: Mutex::new(state),
            events: RwLock::new(Some(sender)),
        }
    }

    /// Replace the default always-reachable transport.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the default simulated restart.
    pub fn with_supervisor(mut self, supervisor: Box<dyn AgentSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Receive every event published from now on.
    ///
    /// After `shutdown()` the returned receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        let guard = self.events.read().expect("event channel lock poisoned");
        match guard.as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    // ── Router ───────────────────────────────────────────────────────────────

    /// Validate `draft` and route it to its receivers.
    ///
    /// Fails synchronously, with nothing queued, when a required field is
    /// missing (`Validation`), the id was already used (`DuplicateMessage`) or
    /// the bus is shut down. Unreachable receivers are not an error: their
    /// copies go to the retry queue.
    pub fn send_message(&self, draft: MessageDraft) -> CoordResult<MessageId> {
        let message = draft.validate(self.clock.now()).map_err(|e| {
            warn!(error = %e, "rejected message");
            e
        })?;

        let mut events = Vec::new();
        let message_id = {
            let mut state = self.lock_state()?;
            if state.shut_down {
                return Err(CoordError::ShutDown);
            }
            self.route(&mut state, message, &mut events)?
        };
        self.publish(events);
        Ok(message_id)
    }

    /// Escalate a conflict to the resolver configured for its level.
    ///
    /// PEER goes to the system architect, SUPERIOR to the program manager,
    /// EXECUTIVE to the technical executive. Always sent CRITICAL.
    pub fn resolve_conflict(
        &self,
        sender: impl Into<AgentId>,
        conflict: ConflictDetails,
        context_id: impl Into<String>,
    ) -> CoordResult<MessageId> {
        let resolver = self.escalation.resolver_for(conflict.escalation_level);
        info!(
            conflict_id = %conflict.conflict_id,
            level = ?conflict.escalation_level,
            resolver = %resolver,
            "escalating conflict"
        );

        let draft = MessageDraft::new(
            sender,
            Receiver::Unicast(resolver),
            context_id,
            MessagePayload::ConflictResolutionRequest(conflict),
        )
        .priority(Priority::Critical);
        self.send_message(draft)
    }

    fn route(
        &self,
        state: &mut BusState,
        message: AgentMessage,
        events: &mut Vec<BusEvent>,
    ) -> CoordResult<MessageId> {
        let now = self.clock.now();
        let message_id = message.message_id;

        if addresses_system(&message.receiver) {
            warn!(message_id = %message_id, "rejecting message addressed to the bus itself");
            return Err(CoordError::validation("receiver"));
        }

        if state.known_ids.contains_key(&message_id) {
            warn!(message_id = %message_id, "rejecting duplicate message id");
            return Err(CoordError::DuplicateMessage {
                message_id: message_id.to_string(),
            });
        }
        state.known_ids.insert(message_id, now);

        if !is_system(&message.sender_id) {
            self.observe_activity(state, &message.sender_id, now, events);
            self.apply_sender_effects(state, &message, now, events);
        }

        if let Some(reply_to) = message.in_reply_to {
            if let Some(pending) = state.tracker.resolve(&reply_to) {
                debug!(
                    message_id = %reply_to,
                    reply_id = %message_id,
                    waited_ms = (now - pending.registered_at).num_milliseconds(),
                    "reply received, response timer cancelled"
                );
            }
        }

        let targets = resolve_targets(state, &message.receiver, &message.sender_id);
        if targets.is_empty() {
            debug!(message_id = %message_id, "message has no recipients");
        }

        for target in &targets {
            state.agent_mut(target, now);
            if let Err(e) = self.deliver(state, target, &message, 1, events) {
                let next_retry_time = state.retries.schedule(
                    target.clone(),
                    message.clone(),
                    e.to_string(),
                    now,
                    &self.config,
                );
                warn!(
                    message_id = %message_id,
                    agent_id = %target,
                    error = %e,
                    next_retry = %next_retry_time,
                    "delivery failed, retry scheduled"
                );
                events.push(BusEvent::DeliveryRetryScheduled {
                    message_id,
                    agent_id: target.clone(),
                    retry_count: 0,
                    next_retry_time,
                });
            }
        }

        if let Err(e) = self.history.record(&message) {
            warn!(message_id = %message_id, error = %e, "failed to record message history");
        }

        debug!(
            message_id = %message_id,
            message_type = ?message.message_type(),
            priority = ?message.priority,
            sender = %message.sender_id,
            targets = targets.len(),
            "message sent"
        );
        events.push(BusEvent::MessageSent {
            message_id,
            message_type: message.message_type(),
            priority: message.priority,
            sender_id: message.sender_id.clone(),
            targets,
        });

        if message.message_type().requires_reply() {
            state
                .tracker
                .register(message.clone(), now, self.config.response_timeout());
        }

        if let MessagePayload::StatusUpdate(update) = &message.payload {
            if update.status == TaskStatus::Blocked {
                self.escalate_blocker(state, &message, update, events);
            }
        }

        Ok(message_id)
    }

    /// Route a message the bus composed itself. Failures are logged, never
    /// propagated: they must not abort the operation that triggered them.
    fn route_internal(
        &self,
        state: &mut BusState,
        draft: MessageDraft,
        events: &mut Vec<BusEvent>,
        purpose: &str,
    ) -> Option<MessageId> {
        let routed = draft
            .validate(self.clock.now())
            .and_then(|message| self.route(state, message, events));
        match routed {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(purpose, error = %e, "internal message not routed");
                None
            }
        }
    }

    /// One delivery attempt: transport first, then the ordered mailbox write.
    fn deliver(
        &self,
        state: &mut BusState,
        target: &AgentId,
        message: &AgentMessage,
        attempt: u32,
        events: &mut Vec<BusEvent>,
    ) -> CoordResult<()> {
        self.transport.deliver(target, message)?;

        let position = state.mailboxes.insert(target, message.clone());
        let now = self.clock.now();
        state.agent_mut(target, now).refresh_heartbeat(now);

        if let MessagePayload::TaskAssignment(assignment) = &message.payload {
            let agent = state.agent_mut(target, now);
            if agent.task_mut(&assignment.task_id).is_none() {
                agent
                    .assigned_tasks
                    .push(TaskRef::new(&assignment.task_id, &assignment.title));
            }
            state
                .task_payloads
                .insert(assignment.task_id.clone(), assignment.clone());
        }

        debug!(
            message_id = %message.message_id,
            agent_id = %target,
            position,
            attempt,
            "message delivered"
        );
        events.push(BusEvent::MessageDelivered {
            message_id: message.message_id,
            agent_id: target.clone(),
            attempt,
        });
        Ok(())
    }

    // ── Agent state ──────────────────────────────────────────────────────────

    /// Activity from `agent_id`: refresh its heartbeat and clear any
    /// degraded or healing marker.
    fn observe_activity(
        &self,
        state: &mut BusState,
        agent_id: &AgentId,
        now: DateTime<Utc>,
        events: &mut Vec<BusEvent>,
    ) {
        let recovering = state.healing.remove(agent_id);
        let agent = state.agent_mut(agent_id, now);
        agent.refresh_heartbeat(now);

        if recovering {
            agent.status = AgentStatus::Active;
            agent.health_status = HealthStatus::Healthy;
            info!(agent_id = %agent_id, "healing agent reported activity, marked active");
            events.push(BusEvent::AgentStateUpdated {
                state: agent.clone(),
            });
        } else if agent.health_status != HealthStatus::Healthy {
            agent.health_status = HealthStatus::Healthy;
            events.push(BusEvent::AgentStateUpdated {
                state: agent.clone(),
            });
        }
    }

    /// State changes implied by what the sender reported about itself.
    fn apply_sender_effects(
        &self,
        state: &mut BusState,
        message: &AgentMessage,
        now: DateTime<Utc>,
        events: &mut Vec<BusEvent>,
    ) {
        let agent = state.agent_mut(&message.sender_id, now);
        match &message.payload {
            MessagePayload::StatusUpdate(update) => {
                let transition = agent.task_mut(&update.task_id).map(|task| {
                    let from = task.status;
                    if from.can_transition_to(update.status) {
                        task.status = update.status;
                        Ok(from)
                    } else {
                        Err(from)
                    }
                });
                match transition {
                    Some(Ok(_)) => events.push(BusEvent::AgentStateUpdated {
                        state: agent.clone(),
                    }),
                    Some(Err(from)) => warn!(
                        agent_id = %message.sender_id,
                        task_id = %update.task_id,
                        from = ?from,
                        to = ?update.status,
                        "ignoring illegal task status transition"
                    ),
                    None => debug!(
                        agent_id = %message.sender_id,
                        task_id = %update.task_id,
                        "status update for a task the bus did not assign"
                    ),
                }
            }
            MessagePayload::HealthCheck(report) => {
                agent.status = report.status;
                agent.set_load(report.current_load);
                events.push(BusEvent::AgentStateUpdated {
                    state: agent.clone(),
                });
            }
            _ => {}
        }
    }

    /// Make sure `agent_id` is tracked. Returns its current state.
    pub fn register_agent(&self, agent_id: AgentId) -> CoordResult<AgentState> {
        if is_system(&agent_id) {
            return Err(CoordError::ConfigError {
                reason: format!("'{}' is reserved for the bus itself", SYSTEM_SENDER),
            });
        }
        let mut state = self.lock_state()?;
        let now = self.clock.now();
        Ok(state.agent_mut(&agent_id, now).clone())
    }

    /// Apply a state report from `agent_id`. Counts as a heartbeat.
    pub fn update_agent_state(
        &self,
        agent_id: &AgentId,
        update: AgentStateUpdate,
    ) -> CoordResult<AgentState> {
        let mut events = Vec::new();
        let snapshot = {
            let mut state = self.lock_state()?;
            if state.shut_down {
                return Err(CoordError::ShutDown);
            }
            let now = self.clock.now();
            self.observe_activity(&mut state, agent_id, now, &mut events);
            let agent = state.agent_mut(agent_id, now);
            update.apply_to(agent);
            let snapshot = agent.clone();
            events.push(BusEvent::AgentStateUpdated {
                state: snapshot.clone(),
            });
            snapshot
        };
        self.publish(events);
        Ok(snapshot)
    }

    pub fn agent_state(&self, agent_id: &AgentId) -> Option<AgentState> {
        let state = self.state.lock().expect("bus state lock poisoned");
        state.agents.get(agent_id).cloned()
    }

    pub fn known_agents(&self) -> Vec<AgentId> {
        let state = self.state.lock().expect("bus state lock poisoned");
        state.agents.keys().cloned().collect()
    }

    // ── Mailbox ──────────────────────────────────────────────────────────────

    /// Ordered snapshot of `agent_id`'s mailbox.
    pub fn messages_for_agent(&self, agent_id: &AgentId) -> Vec<AgentMessage> {
        let state = self.state.lock().expect("bus state lock poisoned");
        state.mailboxes.messages_for(agent_id)
    }

    /// Remove a processed message from `agent_id`'s mailbox.
    ///
    /// Returns true if the message was there. Calling again with the same id
    /// changes nothing and emits nothing.
    pub fn mark_message_processed(
        &self,
        agent_id: &AgentId,
        message_id: &MessageId,
    ) -> CoordResult<bool> {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.lock_state()?;
            let removed = state.mailboxes.remove(agent_id, message_id).is_some();
            if removed {
                let now = self.clock.now();
                self.observe_activity(&mut state, agent_id, now, &mut events);
                debug!(agent_id = %agent_id, message_id = %message_id, "message processed");
                events.push(BusEvent::MessageProcessed {
                    message_id: *message_id,
                    agent_id: agent_id.clone(),
                });
            }
            removed
        };
        self.publish(events);
        Ok(removed)
    }

    // ── Response tracker ─────────────────────────────────────────────────────

    pub fn pending_responses(&self) -> usize {
        let state = self.state.lock().expect("bus state lock poisoned");
        state.tracker.len()
    }

    pub fn is_awaiting_reply(&self, message_id: &MessageId) -> bool {
        let state = self.state.lock().expect("bus state lock poisoned");
        state.tracker.contains(message_id)
    }

    /// Drop every pending response past its deadline, emitting a
    /// `ResponseTimeout` for each. Returns how many expired.
    pub fn expire_responses(&self) -> CoordResult<usize> {
        let mut events = Vec::new();
        {
            let mut state = self.lock_state()?;
            let now = self.clock.now();
            for pending in state.tracker.expire(now) {
                let message = &pending.message;
                warn!(
                    message_id = %message.message_id,
                    message_type = ?message.message_type(),
                    sender = %message.sender_id,
                    deadline = %pending.deadline,
                    "response timed out"
                );
                events.push(BusEvent::ResponseTimeout {
                    message_id: message.message_id,
                    message_type: message.message_type(),
                    sender_id: message.sender_id.clone(),
                    deadline: pending.deadline,
                });
            }
        }
        let expired = events.len();
        self.publish(events);
        Ok(expired)
    }

    // ── Retry manager ────────────────────────────────────────────────────────

    pub fn retry_queue_len(&self) -> usize {
        let state = self.state.lock().expect("bus state lock poisoned");
        state.retries.len()
    }

    /// Re-attempt every retry entry that is due. Returns how many were
    /// delivered this sweep.
    pub fn process_retries(&self) -> CoordResult<usize> {
        let mut events = Vec::new();
        let mut delivered = 0;
        {
            let mut state = self.lock_state()?;
            if state.shut_down {
                return Ok(0);
            }
            let now = self.clock.now();

            for entry in state.retries.take_due(now) {
                let attempt = entry.attempts() + 1;
                match self.deliver(&mut state, &entry.agent_id, &entry.message, attempt, &mut events) {
                    Ok(()) => {
                        info!(
                            message_id = %entry.message.message_id,
                            agent_id = %entry.agent_id,
                            attempt,
                            "retried delivery succeeded"
                        );
                        delivered += 1;
                    }
                    Err(e) => {
                        let message_id = entry.message.message_id;
                        let agent_id = entry.agent_id.clone();
                        match state.retries.reschedule(entry, e.to_string(), now, &self.config) {
                            RetryOutcome::Rescheduled {
                                retry_count,
                                next_retry_time,
                            } => {
                                warn!(
                                    message_id = %message_id,
                                    agent_id = %agent_id,
                                    retry_count,
                                    next_retry = %next_retry_time,
                                    error = %e,
                                    "retried delivery failed"
                                );
                                events.push(BusEvent::DeliveryRetryScheduled {
                                    message_id,
                                    agent_id,
                                    retry_count,
                                    next_retry_time,
                                });
                            }
                            RetryOutcome::Exhausted(entry) => {
                                error!(
                                    message_id = %message_id,
                                    agent_id = %agent_id,
                                    attempts = entry.attempts(),
                                    error = %entry.last_error,
                                    "delivery permanently failed, message dropped"
                                );
                                events.push(BusEvent::DeliveryFailed {
                                    message_id,
                                    agent_id: agent_id.clone(),
                                    attempts: entry.attempts(),
                                    reason: entry.last_error.clone(),
                                });
                                self.notify_delivery_failure(&mut state, &entry, &mut events);
                            }
                        }
                    }
                }
            }
        }
        self.publish(events);
        Ok(delivered)
    }

    /// Tell the original sender that one of its messages was dropped.
    fn notify_delivery_failure(
        &self,
        state: &mut BusState,
        entry: &RetryEntry,
        events: &mut Vec<BusEvent>,
    ) {
        let original = &entry.message;
        if is_system(&original.sender_id) {
            return;
        }
        let alert = SystemAlert {
            kind: AlertKind::DeliveryFailure,
            affected_agent: Some(entry.agent_id.clone()),
            description: format!(
                "{:?} message {} could not be delivered to '{}': {}",
                original.message_type(),
                original.message_id,
                entry.agent_id,
                entry.last_error
            ),
            action_taken: format!("Dropped after {} attempts.", entry.attempts()),
        };
        let draft = MessageDraft::new(
            system_sender(),
            Receiver::Unicast(original.sender_id.clone()),
            original.context_id.clone(),
            MessagePayload::SystemAlert(alert),
        )
        .priority(Priority::High)
        .conversation(original.conversation_id.clone());
        self.route_internal(state, draft, events, "delivery failure alert");
    }

    // ── Health monitor and self-healing ──────────────────────────────────────

    /// Run one health sweep over every known agent.
    ///
    /// Agents silent for longer than the heartbeat timeout are healed (at most
    /// once per episode: agents already healing are skipped). Agents silent
    /// for longer than the degraded threshold are marked degraded.
    pub fn check_health(&self) -> CoordResult<HealthSweep> {
        let mut events = Vec::new();
        let mut sweep = HealthSweep::default();
        {
            let mut state = self.lock_state()?;
            if state.shut_down {
                return Ok(sweep);
            }
            let now = self.clock.now();
            // Assess everyone first: healing alerts are deliveries and would
            // refresh agents later in the sweep.
            let assessed: Vec<(AgentId, Liveness, HealthStatus)> = state
                .agents
                .values()
                .filter(|agent| !state.healing.contains(&agent.agent_id))
                .map(|agent| {
                    (
                        agent.agent_id.clone(),
                        health::assess(agent, now, &self.config),
                        agent.health_status,
                    )
                })
                .collect();

            for (agent_id, liveness, health_status) in assessed {
                match liveness {
                    Liveness::Unhealthy => {
                        self.heal(&mut state, &agent_id, now, &mut events);
                        sweep.healed.push(agent_id);
                    }
                    Liveness::Degraded if health_status == HealthStatus::Healthy => {
                        let agent = state.agent_mut(&agent_id, now);
                        agent.health_status = HealthStatus::Degraded;
                        warn!(
                            agent_id = %agent_id,
                            last_heartbeat = %agent.last_heartbeat,
                            "agent heartbeat is stale, marked degraded"
                        );
                        events.push(BusEvent::AgentStateUpdated {
                            state: agent.clone(),
                        });
                        sweep.degraded.push(agent_id);
                    }
                    _ => {}
                }
            }
        }
        self.publish(events);
        Ok(sweep)
    }

    /// Self-heal one unhealthy agent: redistribute its unfinished tasks,
    /// reset it, restart it, and tell everyone.
    fn heal(
        &self,
        state: &mut BusState,
        agent_id: &AgentId,
        now: DateTime<Utc>,
        events: &mut Vec<BusEvent>,
    ) {
        state.healing.insert(agent_id.clone());

        let (last_heartbeat, tasks) = {
            let agent = state.agent_mut(agent_id, now);
            agent.health_status = HealthStatus::Unhealthy;
            let tasks: Vec<TaskRef> = agent.incomplete_tasks().cloned().collect();
            (agent.last_heartbeat, tasks)
        };
        info!(
            agent_id = %agent_id,
            last_heartbeat = %last_heartbeat,
            unfinished_tasks = tasks.len(),
            "agent unhealthy, starting self-healing"
        );
        events.push(BusEvent::AgentUnhealthy {
            agent_id: agent_id.clone(),
            last_heartbeat,
        });

        // 1-3: move unfinished work to a capable, lightly loaded peer.
        let failed_capabilities = self.capabilities.capabilities_of(agent_id);
        let mut moved = 0;
        for task in &tasks {
            let alternative = health::select_alternative(
                agent_id,
                &failed_capabilities,
                state.agents.values(),
                self.capabilities.as_ref(),
                &state.healing,
                now,
                &self.config,
            );
            let Some(alternative) = alternative else {
                warn!(
                    agent_id = %agent_id,
                    task_id = %task.task_id,
                    "no eligible agent to take over task, leaving it unassigned"
                );
                events.push(BusEvent::RedistributionUnresolved {
                    task_id: task.task_id.clone(),
                    from_agent: agent_id.clone(),
                });
                continue;
            };

            let mut assignment = state
                .task_payloads
                .get(&task.task_id)
                .cloned()
                .unwrap_or_else(|| TaskAssignment::new(&task.task_id, &task.title));
            assignment.redistribution = Some(Redistribution {
                original_agent: agent_id.clone(),
                reason: format!(
                    "no heartbeat for more than {}s",
                    self.config.heartbeat_timeout_secs
                ),
            });

            let draft = MessageDraft::new(
                system_sender(),
                Receiver::Unicast(alternative.clone()),
                SELF_HEALING_CONTEXT,
                MessagePayload::TaskAssignment(assignment),
            )
            .priority(Priority::High)
            .conversation(format!("self-healing-{}", agent_id));

            if let Some(message_id) = self.route_internal(state, draft, events, "task redistribution") {
                moved += 1;
                info!(
                    task_id = %task.task_id,
                    from = %agent_id,
                    to = %alternative,
                    "task redistributed"
                );
                events.push(BusEvent::TaskRedistributed {
                    task_id: task.task_id.clone(),
                    from_agent: agent_id.clone(),
                    to_agent: alternative,
                    message_id,
                });
            }
        }

        // 4: reset.
        {
            let agent = state.agent_mut(agent_id, now);
            agent.status = AgentStatus::Healing;
            agent.current_load = 0.0;
            agent.assigned_tasks.clear();
            events.push(BusEvent::AgentStateUpdated {
                state: agent.clone(),
            });
        }

        // 5: restart.
        let restarted = match self.supervisor.restart(agent_id) {
            Ok(()) => {
                let agent = state.agent_mut(agent_id, now);
                agent.status = AgentStatus::Active;
                agent.health_status = HealthStatus::Healthy;
                agent.refresh_heartbeat(now);
                state.healing.remove(agent_id);
                info!(agent_id = %agent_id, "agent restarted");
                events.push(BusEvent::AgentRestarted {
                    agent_id: agent_id.clone(),
                    at: now,
                });
                true
            }
            Err(e) => {
                error!(
                    agent_id = %agent_id,
                    error = %e,
                    "agent restart failed, agent stays in healing until it reports activity"
                );
                false
            }
        };

        // 6: tell everyone.
        let alert = SystemAlert {
            kind: AlertKind::AgentHealed,
            affected_agent: Some(agent_id.clone()),
            description: format!(
                "Agent '{}' stopped responding (last heartbeat {}).",
                agent_id,
                last_heartbeat.to_rfc3339()
            ),
            action_taken: format!(
                "Redistributed {} of {} unfinished task(s); {}.",
                moved,
                tasks.len(),
                if restarted {
                    "agent restarted"
                } else {
                    "restart failed, awaiting recovery"
                }
            ),
        };
        let draft = MessageDraft::new(
            system_sender(),
            Receiver::Broadcast,
            SELF_HEALING_CONTEXT,
            MessagePayload::SystemAlert(alert),
        )
        .priority(Priority::High)
        .conversation(format!("self-healing-{}", agent_id));
        self.route_internal(state, draft, events, "healing alert");
    }

    // ── Blocked-task escalation ──────────────────────────────────────────────

    fn escalate_blocker(
        &self,
        state: &mut BusState,
        origin: &AgentMessage,
        update: &StatusUpdate,
        events: &mut Vec<BusEvent>,
    ) {
        let Some(blocker) = &update.blocker else {
            debug!(task_id = %update.task_id, "blocked without blocker details, nothing to escalate");
            return;
        };

        if let Some(blocking_agent) = &blocker.blocking_agent {
            let query = Inquiry {
                question: format!(
                    "Task '{}' is blocked waiting on you ({}). What is your timeline for resolving it?",
                    update.task_id, blocker.description
                ),
                context: json!({
                    "task_id": update.task_id,
                    "blocked_agent": origin.sender_id,
                    "blocker_type": blocker.blocker_type,
                }),
            };
            let draft = MessageDraft::new(
                origin.sender_id.clone(),
                Receiver::Unicast(blocking_agent.clone()),
                origin.context_id.clone(),
                MessagePayload::Query(query),
            )
            .priority(Priority::High)
            .conversation(origin.conversation_id.clone());
            info!(
                task_id = %update.task_id,
                blocked = %origin.sender_id,
                blocking = %blocking_agent,
                "asking blocking agent for a resolution timeline"
            );
            self.route_internal(state, draft, events, "blocker query");
        }

        if blocker.blocker_type == BlockerType::ResourceUnavailable {
            let executives = self.escalation.executive_roles();
            if executives.is_empty() {
                warn!(task_id = %update.task_id, "resource contention but no executive roles configured");
                return;
            }

            let mut involved = vec![origin.sender_id.clone()];
            involved.extend(blocker.blocking_agent.iter().cloned());
            let conflict = ConflictDetails {
                conflict_id: format!("resource-{}-{}", update.task_id, origin.message_id),
                conflict_type: ConflictType::ResourceContention,
                severity: Severity::High,
                escalation_level: EscalationLevel::Executive,
                description: format!(
                    "Resource contention: task '{}' owned by '{}' cannot proceed: {}",
                    update.task_id, origin.sender_id, blocker.description
                ),
                involved_agents: involved,
                business_impact: Some(format!(
                    "Task '{}' is stalled until the resource is allocated; deliverables that depend on it will slip.",
                    update.task_id
                )),
            };
            let draft = MessageDraft::new(
                origin.sender_id.clone(),
                Receiver::Multicast(executives),
                origin.context_id.clone(),
                MessagePayload::ConflictResolutionRequest(conflict),
            )
            .priority(Priority::Critical)
            .conversation(origin.conversation_id.clone());
            info!(task_id = %update.task_id, "escalating resource contention to executives");
            self.route_internal(state, draft, events, "resource contention escalation");
        }
    }

    // ── History ──────────────────────────────────────────────────────────────

    /// Retained messages of one conversation, oldest first.
    pub fn conversation(&self, conversation_id: &str) -> CoordResult<Vec<AgentMessage>> {
        self.history.conversation(conversation_id)
    }

    /// Purge history and remembered message ids older than the retention
    /// window. Returns how many history records were dropped.
    pub fn cleanup_history(&self) -> CoordResult<usize> {
        let mut state = self.lock_state()?;
        let cutoff = self.clock.now() - self.config.history_retention();
        let purged = self.history.purge_before(cutoff)?;
        let before = state.known_ids.len();
        state.known_ids.retain(|_, seen| *seen >= cutoff);
        debug!(
            purged,
            forgotten_ids = before - state.known_ids.len(),
            cutoff = %cutoff,
            "history cleanup"
        );
        Ok(purged)
    }

    // ── Scheduling ───────────────────────────────────────────────────────────

    pub fn run_job(&self, job: PeriodicJob) -> CoordResult<()> {
        match job {
            PeriodicJob::ResponseTimeouts => self.expire_responses().map(drop),
            PeriodicJob::RetrySweep => self.process_retries().map(drop),
            PeriodicJob::HealthCheck => self.check_health().map(drop),
            PeriodicJob::HistoryCleanup => self.cleanup_history().map(drop),
        }
    }

    /// Run every periodic job that is due on the bus clock.
    ///
    /// With a `ManualClock` this is the whole scheduler: advance the clock,
    /// call `tick()`. Returns the jobs that ran.
    pub fn tick(&self) -> CoordResult<Vec<PeriodicJob>> {
        let due = {
            let mut state = self.lock_state()?;
            if state.shut_down {
                return Ok(Vec::new());
            }
            let now = self.clock.now();
            state.schedule.due(now, &self.config)
        };
        for job in &due {
            self.run_job(*job)?;
        }
        Ok(due)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Stop accepting work, drop every pending timer and retry, and close
    /// the event channel. Idempotent.
    pub fn shutdown(&self) -> CoordResult<()> {
        {
            let mut state = self.lock_state()?;
            if state.shut_down {
                return Ok(());
            }
            state.shut_down = true;
            info!(
                pending_responses = state.tracker.len(),
                pending_retries = state.retries.len(),
                "coordination bus shutting down"
            );
            state.tracker.clear();
            state.retries.clear();
        }
        let mut events = self.events.write().map_err(|e| CoordError::StatePoisoned {
            reason: format!("event channel lock poisoned: {}", e),
        })?;
        events.take();
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().expect("bus state lock poisoned").shut_down
    }

    fn lock_state(&self) -> CoordResult<MutexGuard<'_, BusState>> {
        self.state.lock().map_err(|e| CoordError::StatePoisoned {
            reason: format!("bus state lock poisoned: {}", e),
        })
    }

    fn publish(&self, events: Vec<BusEvent>) {
        if events.is_empty() {
            return;
        }
        let guard = self.events.read().expect("event channel lock poisoned");
        if let Some(sender) = guard.as_ref() {
            for event in events {
                // No subscribers is fine; events are best-effort notifications.
                let _ = sender.send(event);
            }
        }
    }
}

/// Expand a receiver into concrete target ids, never including the bus.
fn resolve_targets(state: &BusState, receiver: &Receiver, sender: &AgentId) -> Vec<AgentId> {
    let targets: Vec<AgentId> = match receiver {
        Receiver::Unicast(agent_id) => vec![agent_id.clone()],
        Receiver::Multicast(agent_ids) => {
            let mut seen = HashSet::new();
            agent_ids
                .iter()
                .filter(|id| seen.insert((*id).clone()))
                .cloned()
                .collect()
        }
        Receiver::Broadcast => state
            .agents
            .keys()
            .filter(|id| *id != sender)
            .cloned()
            .collect(),
    };
    targets.into_iter().filter(|id| !is_system(id)).collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::broadcast;

    use concord_contracts::{
        agent::{AgentId, AgentStateUpdate, AgentStatus, HealthStatus},
        capability::CapabilitySet,
        config::BusConfig,
        error::{CoordError, CoordResult},
        event::BusEvent,
        message::{AgentMessage, MessageDraft, MessageId, Priority, Receiver},
        payload::{
            AlertKind, Blocker, BlockerType, ConflictDetails, ConflictType, EscalationLevel, Inquiry,
            InformationResponse, MessagePayload, MessageType, Severity, StatusUpdate,
            TaskAssignment,
        },
        task::TaskStatus,
    };

    use crate::{
        clock::ManualClock,
        traits::{AgentSupervisor, CapabilityDirectory, EscalationPolicy, HistoryStore, Transport},
    };

    use super::CoordinationBus;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    /// Fixed resolver table: architect / program manager / cto.
    struct MockEscalation;

    impl EscalationPolicy for MockEscalation {
        fn resolver_for(&self, level: EscalationLevel) -> AgentId {
            match level {
                EscalationLevel::Peer => AgentId::new("system-architect"),
                EscalationLevel::Superior => AgentId::new("program-manager"),
                EscalationLevel::Executive => AgentId::new("cto"),
            }
        }

        fn executive_roles(&self) -> Vec<AgentId> {
            vec![AgentId::new("cto"), AgentId::new("ceo")]
        }
    }

    struct MockDirectory(BTreeMap<AgentId, CapabilitySet>);

    impl MockDirectory {
        fn new(profiles: &[(&str, &[&str])]) -> Self {
            Self(
                profiles
                    .iter()
                    .map(|(id, caps)| (AgentId::new(*id), caps.iter().copied().collect()))
                    .collect(),
            )
        }
    }

    impl CapabilityDirectory for MockDirectory {
        fn capabilities_of(&self, agent_id: &AgentId) -> CapabilitySet {
            self.0.get(agent_id).cloned().unwrap_or_default()
        }

        fn agents(&self) -> Vec<AgentId> {
            self.0.keys().cloned().collect()
        }
    }

    /// A history store that keeps everything in a shared Vec.
    struct MockHistory {
        records: Arc<Mutex<Vec<AgentMessage>>>,
    }

    impl HistoryStore for MockHistory {
        fn record(&self, message: &AgentMessage) -> CoordResult<()> {
            self.records.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn conversation(&self, conversation_id: &str) -> CoordResult<Vec<AgentMessage>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect())
        }

        fn purge_before(&self, cutoff: DateTime<Utc>) -> CoordResult<usize> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|m| m.timestamp >= cutoff);
            Ok(before - records.len())
        }
    }

    /// A transport that fails a configurable number of times per agent
    /// (`u32::MAX` = forever) and counts every attempt.
    #[derive(Clone, Default)]
    struct ScriptedTransport {
        failures: Arc<Mutex<HashMap<AgentId, u32>>>,
        attempts: Arc<Mutex<Vec<AgentId>>>,
    }

    impl ScriptedTransport {
        fn fail(&self, agent: &str, times: u32) {
            self.failures.lock().unwrap().insert(AgentId::new(agent), times);
        }

        fn attempts_to(&self, agent: &str) -> usize {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.as_str() == agent)
                .count()
        }
    }

    impl Transport for ScriptedTransport {
        fn deliver(&self, agent_id: &AgentId, _message: &AgentMessage) -> CoordResult<()> {
            self.attempts.lock().unwrap().push(agent_id.clone());
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(agent_id) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    Err(CoordError::DeliveryFailed {
                        agent_id: agent_id.to_string(),
                        reason: "agent unreachable".to_string(),
                    })
                }
                _ => Ok(()),
            }
        }
    }

    struct FailingSupervisor;

    impl AgentSupervisor for FailingSupervisor {
        fn restart(&self, agent_id: &AgentId) -> CoordResult<()> {
            Err(CoordError::RestartFailed {
                agent_id: agent_id.to_string(),
                reason: "host unreachable".to_string(),
            })
        }
    }

    struct Harness {
        bus: CoordinationBus,
        clock: Arc<ManualClock>,
        history: Arc<Mutex<Vec<AgentMessage>>>,
        events: broadcast::Receiver<BusEvent>,
    }

    impl Harness {
        fn new(profiles: &[(&str, &[&str])]) -> Self {
            Self::build(profiles, |bus| bus)
        }

        fn build(
            profiles: &[(&str, &[&str])],
            customize: impl FnOnce(CoordinationBus) -> CoordinationBus,
        ) -> Self {
            let clock = Arc::new(ManualClock::new(start()));
            let history = Arc::new(Mutex::new(Vec::new()));
            let config = BusConfig {
                event_channel_capacity: 4_096,
                ..BusConfig::default()
            };
            let bus = customize(CoordinationBus::new(
                config,
                clock.clone(),
                Arc::new(MockEscalation),
                Arc::new(MockDirectory::new(profiles)),
                Box::new(MockHistory {
                    records: history.clone(),
                }),
            ));
            let events = bus.subscribe();
            Self {
                bus,
                clock,
                history,
                events,
            }
        }

        fn drain(&mut self) -> Vec<BusEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// Advance one second at a time, ticking after each step.
        fn run_for(&self, secs: i64) {
            for _ in 0..secs {
                self.clock.advance_secs(1);
                self.bus.tick().unwrap();
            }
        }

        fn mailbox(&self, agent: &str) -> Vec<AgentMessage> {
            self.bus.messages_for_agent(&AgentId::new(agent))
        }
    }

    fn task(task_id: &str) -> MessagePayload {
        MessagePayload::TaskAssignment(TaskAssignment::new(task_id, format!("work on {task_id}")))
    }

    fn query(question: &str) -> MessagePayload {
        MessagePayload::Query(Inquiry {
            question: question.to_string(),
            context: serde_json::Value::Null,
        })
    }

    fn to(agent: &str) -> Receiver {
        Receiver::Unicast(AgentId::new(agent))
    }

    fn task_id_of(message: &AgentMessage) -> &str {
        match &message.payload {
            MessagePayload::TaskAssignment(t) => &t.task_id,
            other => panic!("expected task assignment, got {:?}", other),
        }
    }

    // ── Router and mailbox ───────────────────────────────────────────────────

    #[test]
    fn higher_priority_is_delivered_ahead_of_earlier_lower_priority() {
        let h = Harness::new(&[]);
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("m2")).priority(Priority::Medium))
            .unwrap();
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("m1")).priority(Priority::High))
            .unwrap();

        let mailbox = h.mailbox("b");
        let ids: Vec<&str> = mailbox.iter().map(task_id_of).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn same_priority_is_first_in_first_out() {
        let h = Harness::new(&[]);
        for id in ["A", "B"] {
            h.bus
                .send_message(MessageDraft::new("a", to("b"), "ctx", task(id)).priority(Priority::Critical))
                .unwrap();
        }
        let mailbox = h.mailbox("b");
        assert_eq!(task_id_of(&mailbox[0]), "A");
        assert_eq!(task_id_of(&mailbox[1]), "B");
    }

    #[test]
    fn invalid_message_is_rejected_without_side_effects() {
        let mut h = Harness::new(&[]);
        let draft = MessageDraft {
            context_id: None,
            ..MessageDraft::new("a", to("b"), "ctx", query("?"))
        };

        match h.bus.send_message(draft) {
            Err(CoordError::Validation { field }) => assert_eq!(field, "context_id"),
            other => panic!("expected Validation, got {:?}", other),
        }
        assert!(h.mailbox("b").is_empty());
        assert!(h.history.lock().unwrap().is_empty());
        assert_eq!(h.bus.pending_responses(), 0);
        assert_eq!(h.bus.retry_queue_len(), 0);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn undeliverable_receivers_are_rejected() {
        let mut h = Harness::new(&[("a", &[])]);
        let receivers = [
            to(""),
            to(super::SYSTEM_SENDER),
            Receiver::Multicast(vec![AgentId::new(super::SYSTEM_SENDER)]),
        ];

        for receiver in receivers {
            match h.bus.send_message(MessageDraft::new("a", receiver, "ctx", query("anyone?"))) {
                Err(CoordError::Validation { field }) => assert_eq!(field, "receiver"),
                other => panic!("expected receiver validation error, got {:?}", other),
            }
        }
        assert_eq!(h.bus.known_agents(), vec![AgentId::new("a")]);
        assert_eq!(h.bus.pending_responses(), 0);
        assert!(h.history.lock().unwrap().is_empty());
        assert!(h.drain().is_empty());
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let h = Harness::new(&[]);
        let id = MessageId::new();
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t1")).with_id(id))
            .unwrap();

        let again = h
            .bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t1")).with_id(id));
        assert!(matches!(again, Err(CoordError::DuplicateMessage { .. })));
        assert_eq!(h.mailbox("b").len(), 1);
    }

    #[test]
    fn broadcast_reaches_every_known_agent_but_the_sender() {
        let h = Harness::new(&[("a", &[]), ("b", &[]), ("c", &[])]);
        h.bus
            .send_message(MessageDraft::new("a", Receiver::Broadcast, "ctx", query("all?")))
            .unwrap();

        assert!(h.mailbox("a").is_empty());
        assert_eq!(h.mailbox("b").len(), 1);
        assert_eq!(h.mailbox("c").len(), 1);
    }

    #[test]
    fn multicast_delivers_once_per_distinct_agent() {
        let h = Harness::new(&[]);
        let receiver = Receiver::Multicast(vec![
            AgentId::new("b"),
            AgentId::new("c"),
            AgentId::new("b"),
        ]);
        h.bus
            .send_message(MessageDraft::new("a", receiver, "ctx", task("t")))
            .unwrap();

        assert_eq!(h.mailbox("b").len(), 1);
        assert_eq!(h.mailbox("c").len(), 1);
        assert_eq!(h.history.lock().unwrap().len(), 1);
    }

    #[test]
    fn mark_processed_is_idempotent() {
        let mut h = Harness::new(&[]);
        let id = h
            .bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t")))
            .unwrap();
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("u")))
            .unwrap();
        h.drain();

        let b = AgentId::new("b");
        assert!(h.bus.mark_message_processed(&b, &id).unwrap());
        let after_once = h.mailbox("b");
        assert!(!h.bus.mark_message_processed(&b, &id).unwrap());
        assert_eq!(h.mailbox("b"), after_once);
        assert_eq!(after_once.len(), 1);

        let processed = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, BusEvent::MessageProcessed { .. }))
            .count();
        assert_eq!(processed, 1);
    }

    #[test]
    fn task_assignment_is_tracked_on_the_receiver() {
        let h = Harness::new(&[]);
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t1")))
            .unwrap();

        let b = h.bus.agent_state(&AgentId::new("b")).unwrap();
        assert_eq!(b.assigned_tasks.len(), 1);
        assert_eq!(b.assigned_tasks[0].task_id, "t1");
        assert_eq!(b.assigned_tasks[0].status, TaskStatus::NotStarted);
    }

    #[test]
    fn status_updates_follow_the_task_state_machine() {
        let h = Harness::new(&[]);
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t1")))
            .unwrap();

        let report = |status| {
            MessagePayload::StatusUpdate(StatusUpdate::new("t1", status))
        };
        let b_task = || h.bus.agent_state(&AgentId::new("b")).unwrap().assigned_tasks[0].status;

        // NOT_STARTED -> COMPLETED is illegal and ignored.
        h.bus
            .send_message(MessageDraft::new("b", to("a"), "ctx", report(TaskStatus::Completed)))
            .unwrap();
        assert_eq!(b_task(), TaskStatus::NotStarted);

        h.bus
            .send_message(MessageDraft::new("b", to("a"), "ctx", report(TaskStatus::InProgress)))
            .unwrap();
        assert_eq!(b_task(), TaskStatus::InProgress);

        h.bus
            .send_message(MessageDraft::new("b", to("a"), "ctx", report(TaskStatus::WaitingForDependency)))
            .unwrap();
        h.bus
            .send_message(MessageDraft::new("b", to("a"), "ctx", report(TaskStatus::InProgress)))
            .unwrap();
        h.bus
            .send_message(MessageDraft::new("b", to("a"), "ctx", report(TaskStatus::Completed)))
            .unwrap();
        assert_eq!(b_task(), TaskStatus::Completed);
    }

    // ── Response tracker ─────────────────────────────────────────────────────

    #[test]
    fn reply_cancels_the_response_timer() {
        let mut h = Harness::new(&[]);
        let asked = h
            .bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", query("status?")))
            .unwrap();
        assert!(h.bus.is_awaiting_reply(&asked));

        h.clock.advance_secs(60);
        let answer = MessagePayload::InformationResponse(InformationResponse {
            content: serde_json::json!({ "eta": "tomorrow" }),
        });
        h.bus
            .send_message(MessageDraft::new("b", to("a"), "ctx", answer).reply_to(asked))
            .unwrap();
        assert!(!h.bus.is_awaiting_reply(&asked));

        h.run_for(600);
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, BusEvent::ResponseTimeout { .. })));
    }

    #[test]
    fn unanswered_query_times_out_after_five_minutes() {
        let mut h = Harness::new(&[]);
        let asked = h
            .bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", query("status?")))
            .unwrap();
        h.drain();

        h.run_for(299);
        assert!(h.bus.is_awaiting_reply(&asked));

        h.run_for(1);
        assert!(!h.bus.is_awaiting_reply(&asked));
        let timeouts: Vec<BusEvent> = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, BusEvent::ResponseTimeout { .. }))
            .collect();
        assert_eq!(timeouts.len(), 1);
        match &timeouts[0] {
            BusEvent::ResponseTimeout { message_id, message_type, .. } => {
                assert_eq!(*message_id, asked);
                assert_eq!(*message_type, MessageType::Query);
            }
            other => panic!("expected ResponseTimeout, got {:?}", other),
        }
    }

    #[test]
    fn non_reply_types_start_no_timer() {
        let h = Harness::new(&[]);
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t")))
            .unwrap();
        assert_eq!(h.bus.pending_responses(), 0);
    }

    // ── Retry manager ────────────────────────────────────────────────────────

    #[test]
    fn always_failing_delivery_is_attempted_four_times() {
        let transport = ScriptedTransport::default();
        transport.fail("b", u32::MAX);
        let probe = transport.clone();
        let mut h = Harness::build(&[], |bus| bus.with_transport(Box::new(transport)));

        let id = h
            .bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t")))
            .unwrap();
        h.run_for(120);

        assert_eq!(probe.attempts_to("b"), 4);
        assert!(h.mailbox("b").is_empty());
        let alerts: Vec<AgentMessage> = h
            .mailbox("a")
            .into_iter()
            .filter(|m| m.message_type() == MessageType::SystemAlert)
            .collect();
        assert_eq!(alerts.len(), 1);
        match &alerts[0].payload {
            MessagePayload::SystemAlert(alert) => {
                assert_eq!(alert.kind, AlertKind::DeliveryFailure);
                assert_eq!(alert.affected_agent, Some(AgentId::new("b")));
            }
            other => panic!("expected system alert, got {:?}", other),
        }
        assert_eq!(h.bus.retry_queue_len(), 0);

        let events = h.drain();
        let scheduled: Vec<(u32, DateTime<Utc>)> = events
            .iter()
            .filter_map(|e| match e {
                BusEvent::DeliveryRetryScheduled { retry_count, next_retry_time, .. } => {
                    Some((*retry_count, *next_retry_time))
                }
                _ => None,
            })
            .collect();
        // Initial failure at t=0 waits 5s; the 10s sweep retries at t=10 and
        // t=20, backing off 2s then 4s.
        let t = |s| start() + chrono::Duration::seconds(s);
        assert_eq!(scheduled, vec![(0, t(5)), (1, t(12)), (2, t(24))]);

        let failed: Vec<&BusEvent> = events
            .iter()
            .filter(|e| matches!(e, BusEvent::DeliveryFailed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        match failed[0] {
            BusEvent::DeliveryFailed { message_id, attempts, .. } => {
                assert_eq!(*message_id, id);
                assert_eq!(*attempts, 4);
            }
            other => panic!("expected DeliveryFailed, got {:?}", other),
        }
    }

    #[test]
    fn retry_delivers_once_the_agent_is_reachable() {
        let transport = ScriptedTransport::default();
        transport.fail("b", 1);
        let h = Harness::build(&[], |bus| bus.with_transport(Box::new(transport)));

        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t")))
            .unwrap();
        assert!(h.mailbox("b").is_empty());
        assert_eq!(h.bus.retry_queue_len(), 1);

        h.run_for(10);
        assert_eq!(h.mailbox("b").len(), 1);
        assert_eq!(h.bus.retry_queue_len(), 0);
    }

    // ── Health monitor and self-healing ──────────────────────────────────────

    #[test]
    fn heartbeat_is_monotonic_across_operations() {
        let h = Harness::new(&[("a", &[])]);
        let a = AgentId::new("a");
        let mut last = h.bus.agent_state(&a).unwrap().last_heartbeat;

        for step in 0..5 {
            h.clock.advance_secs(7);
            if step % 2 == 0 {
                h.bus
                    .update_agent_state(&a, AgentStateUpdate::default().with_load(0.1))
                    .unwrap();
            } else {
                h.bus
                    .send_message(MessageDraft::new("a", to("b"), "ctx", task(&format!("t{step}"))))
                    .unwrap();
            }
            let now = h.bus.agent_state(&a).unwrap().last_heartbeat;
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn delivery_refreshes_the_receivers_heartbeat() {
        let mut h = Harness::new(&[("a", &["planning"]), ("b", &["rust"])]);
        let a = AgentId::new("a");
        let b = AgentId::new("b");

        h.run_for(100);
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("fresh")))
            .unwrap();
        assert_eq!(
            h.bus.agent_state(&b).unwrap().last_heartbeat,
            start() + chrono::Duration::seconds(100)
        );

        h.run_for(50);
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, BusEvent::AgentUnhealthy { agent_id, .. } if *agent_id == b)));
        let state = h.bus.agent_state(&b).unwrap();
        assert_eq!(state.assigned_tasks.len(), 1);
        assert_eq!(state.assigned_tasks[0].task_id, "fresh");
        assert!(h.bus.agent_state(&a).is_some());
    }

    #[test]
    fn agents_silent_together_are_all_healed_in_one_sweep() {
        let mut h = Harness::new(&[("x", &["rust"]), ("y", &["rust"])]);

        h.run_for(150);
        let mut healed: Vec<String> = h
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                BusEvent::AgentUnhealthy { agent_id, .. } => Some(agent_id.to_string()),
                _ => None,
            })
            .collect();
        healed.sort();
        assert_eq!(healed, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn silence_is_flagged_on_the_next_cycle_after_the_timeout() {
        let mut h = Harness::new(&[("b", &["rust"])]);

        h.run_for(120);
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, BusEvent::AgentUnhealthy { .. })));

        // Silent for 121s at t=121; the next 30s cycle is t=150.
        h.run_for(29);
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, BusEvent::AgentUnhealthy { .. })));
        h.run_for(1);
        let unhealthy = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, BusEvent::AgentUnhealthy { .. }))
            .count();
        assert_eq!(unhealthy, 1);
    }

    #[test]
    fn stale_agent_is_marked_degraded_then_recovers() {
        let h = Harness::new(&[("b", &[])]);
        let b = AgentId::new("b");

        h.run_for(90);
        assert_eq!(h.bus.agent_state(&b).unwrap().health_status, HealthStatus::Degraded);

        h.bus
            .update_agent_state(&b, AgentStateUpdate::default().with_status(AgentStatus::Idle))
            .unwrap();
        let state = h.bus.agent_state(&b).unwrap();
        assert_eq!(state.health_status, HealthStatus::Healthy);
        assert_eq!(state.status, AgentStatus::Idle);
    }

    #[test]
    fn failed_restart_does_not_retrigger_healing() {
        let mut h = Harness::build(&[("b", &["rust"])], |bus| {
            bus.with_supervisor(Box::new(FailingSupervisor))
        });
        let b = AgentId::new("b");

        h.run_for(600);
        let unhealthy = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, BusEvent::AgentUnhealthy { .. }))
            .count();
        assert_eq!(unhealthy, 1);
        assert_eq!(h.bus.agent_state(&b).unwrap().status, AgentStatus::Healing);

        // Activity ends the episode.
        h.bus
            .update_agent_state(&b, AgentStateUpdate::default())
            .unwrap();
        let state = h.bus.agent_state(&b).unwrap();
        assert_eq!(state.status, AgentStatus::Active);
        assert_eq!(state.health_status, HealthStatus::Healthy);
    }

    #[test]
    fn unhealthy_agent_work_moves_to_capable_peer() {
        let mut h = Harness::new(&[
            ("agent-a", &["planning"]),
            ("agent-b", &["rust", "api"]),
            ("agent-c", &["rust"]),
        ]);
        let a = AgentId::new("agent-a");
        let b = AgentId::new("agent-b");
        let c = AgentId::new("agent-c");

        // t=0: A assigns a HIGH task to B.
        h.bus
            .send_message(
                MessageDraft::new("agent-a", to("agent-b"), "project-x", task("task-42"))
                    .priority(Priority::High),
            )
            .unwrap();
        assert_eq!(h.mailbox("agent-b").len(), 1);

        // A and C stay alive; C reports load 0.3. B stays silent.
        for _ in 0..5 {
            h.run_for(29);
            h.bus.update_agent_state(&a, AgentStateUpdate::default()).unwrap();
            h.bus
                .update_agent_state(&c, AgentStateUpdate::default().with_load(0.3))
                .unwrap();
            h.run_for(1);
        }
        // t=150: the health check has healed B.
        let events = h.drain();

        let c_tasks: Vec<AgentMessage> = h
            .mailbox("agent-c")
            .into_iter()
            .filter(|m| m.message_type() == MessageType::TaskAssignment)
            .collect();
        assert_eq!(c_tasks.len(), 1);
        match &c_tasks[0].payload {
            MessagePayload::TaskAssignment(t) => {
                assert_eq!(t.task_id, "task-42");
                let redistribution = t.redistribution.as_ref().expect("redistribution marker");
                assert_eq!(redistribution.original_agent, b);
            }
            other => panic!("expected task assignment, got {:?}", other),
        }

        let b_state = h.bus.agent_state(&b).unwrap();
        assert_eq!(b_state.status, AgentStatus::Active);
        assert_eq!(b_state.health_status, HealthStatus::Healthy);
        assert_eq!(b_state.current_load, 0.0);
        assert!(b_state.assigned_tasks.is_empty());
        assert_eq!(b_state.last_heartbeat, start() + chrono::Duration::seconds(150));

        // Reset to healing happened before the restart.
        let b_updates: Vec<AgentStatus> = events
            .iter()
            .filter_map(|e| match e {
                BusEvent::AgentStateUpdated { state } if state.agent_id == b => Some(state.status),
                _ => None,
            })
            .collect();
        assert!(b_updates.contains(&AgentStatus::Healing));
        assert!(events
            .iter()
            .any(|e| matches!(e, BusEvent::AgentRestarted { agent_id, .. } if *agent_id == b)));
        assert!(events.iter().any(|e| matches!(
            e,
            BusEvent::TaskRedistributed { to_agent, .. } if *to_agent == c
        )));

        // Everyone hears about it.
        let alerts = h
            .mailbox("agent-a")
            .into_iter()
            .filter(|m| m.message_type() == MessageType::SystemAlert)
            .count();
        assert_eq!(alerts, 1);

        // C now owns the task.
        let c_state = h.bus.agent_state(&c).unwrap();
        assert_eq!(c_state.assigned_tasks[0].task_id, "task-42");
    }

    #[test]
    fn no_eligible_peer_is_reported_not_silent() {
        let mut h = Harness::new(&[("b", &["rust"]), ("c", &["design"])]);
        let c = AgentId::new("c");
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t9")))
            .unwrap();

        for _ in 0..5 {
            h.run_for(30);
            h.bus.update_agent_state(&c, AgentStateUpdate::default()).unwrap();
            h.bus
                .update_agent_state(&AgentId::new("a"), AgentStateUpdate::default())
                .unwrap();
        }

        let events = h.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            BusEvent::RedistributionUnresolved { task_id, .. } if task_id == "t9"
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, BusEvent::TaskRedistributed { .. })));
        assert!(h.bus.agent_state(&AgentId::new("b")).unwrap().assigned_tasks.is_empty());
    }

    #[test]
    fn completed_tasks_are_not_redistributed() {
        let mut h = Harness::new(&[("b", &["rust"]), ("c", &["rust"])]);
        let c = AgentId::new("c");
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("done")))
            .unwrap();
        for status in [TaskStatus::InProgress, TaskStatus::Completed] {
            h.bus
                .send_message(MessageDraft::new(
                    "b",
                    to("a"),
                    "ctx",
                    MessagePayload::StatusUpdate(StatusUpdate::new("done", status)),
                ))
                .unwrap();
        }

        for _ in 0..5 {
            h.run_for(30);
            h.bus.update_agent_state(&c, AgentStateUpdate::default()).unwrap();
            h.bus
                .update_agent_state(&AgentId::new("a"), AgentStateUpdate::default())
                .unwrap();
        }

        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, BusEvent::AgentUnhealthy { agent_id, .. } if agent_id.as_str() == "b")));
        assert!(!events.iter().any(|e| matches!(
            e,
            BusEvent::TaskRedistributed { .. } | BusEvent::RedistributionUnresolved { .. }
        )));
    }

    // ── Escalation ───────────────────────────────────────────────────────────

    fn conflict(level: EscalationLevel) -> ConflictDetails {
        ConflictDetails {
            conflict_id: "c-1".to_string(),
            conflict_type: ConflictType::TechnicalDisagreement,
            severity: Severity::Medium,
            escalation_level: level,
            description: "schema ownership".to_string(),
            involved_agents: vec![AgentId::new("a"), AgentId::new("b")],
            business_impact: None,
        }
    }

    #[test]
    fn conflict_resolver_follows_the_escalation_table() {
        let h = Harness::new(&[]);
        let table = [
            (EscalationLevel::Peer, "system-architect"),
            (EscalationLevel::Superior, "program-manager"),
            (EscalationLevel::Executive, "cto"),
        ];

        for (level, resolver) in table {
            let id = h.bus.resolve_conflict("a", conflict(level), "ctx").unwrap();
            let inbox = h.mailbox(resolver);
            let msg = inbox
                .iter()
                .find(|m| m.message_id == id)
                .unwrap_or_else(|| panic!("{resolver} did not receive the conflict"));
            assert_eq!(msg.priority, Priority::Critical);
            assert!(h.bus.is_awaiting_reply(&id));
        }
    }

    #[test]
    fn blocked_by_agent_queries_the_blocker() {
        let h = Harness::new(&[]);
        let update = StatusUpdate::new("t1", TaskStatus::Blocked).blocked_by(Blocker {
            blocker_type: BlockerType::Dependency,
            blocking_agent: Some(AgentId::new("db-agent")),
            description: "schema migration pending".to_string(),
        });
        h.bus
            .send_message(MessageDraft::new(
                "api-agent",
                to("lead"),
                "ctx",
                MessagePayload::StatusUpdate(update),
            ))
            .unwrap();

        let inbox = h.mailbox("db-agent");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].priority, Priority::High);
        assert_eq!(inbox[0].sender_id, AgentId::new("api-agent"));
        assert_eq!(inbox[0].message_type(), MessageType::Query);
        assert!(h.bus.is_awaiting_reply(&inbox[0].message_id));

        // Not a resource problem: executives are not involved.
        assert!(h.mailbox("cto").is_empty());
    }

    #[test]
    fn blocked_on_resource_escalates_to_executives() {
        let h = Harness::new(&[]);
        let update = StatusUpdate::new("t1", TaskStatus::Blocked).blocked_by(Blocker {
            blocker_type: BlockerType::ResourceUnavailable,
            blocking_agent: None,
            description: "GPU quota exhausted".to_string(),
        });
        h.bus
            .send_message(MessageDraft::new(
                "ml-agent",
                to("lead"),
                "ctx",
                MessagePayload::StatusUpdate(update),
            ))
            .unwrap();

        for exec in ["cto", "ceo"] {
            let inbox = h.mailbox(exec);
            assert_eq!(inbox.len(), 1, "{exec} should be notified");
            assert_eq!(inbox[0].priority, Priority::Critical);
            match &inbox[0].payload {
                MessagePayload::ConflictResolutionRequest(c) => {
                    assert_eq!(c.conflict_type, ConflictType::ResourceContention);
                    assert!(c.business_impact.is_some());
                }
                other => panic!("expected conflict request, got {:?}", other),
            }
        }
    }

    // ── History and lifecycle ────────────────────────────────────────────────

    #[test]
    fn history_is_purged_after_the_retention_window() {
        let h = Harness::new(&[]);
        let id = MessageId::new();
        h.bus
            .send_message(
                MessageDraft::new("a", to("b"), "ctx", task("t"))
                    .conversation("conv-1")
                    .with_id(id),
            )
            .unwrap();
        assert_eq!(h.bus.conversation("conv-1").unwrap().len(), 1);

        h.clock.advance(chrono::Duration::hours(24) + chrono::Duration::seconds(1));
        assert_eq!(h.bus.cleanup_history().unwrap(), 1);
        assert!(h.bus.conversation("conv-1").unwrap().is_empty());

        // The id fell out of the window and may be used again.
        assert!(h
            .bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", task("t")).with_id(id))
            .is_ok());
    }

    #[test]
    fn shutdown_stops_work_and_closes_events() {
        let mut h = Harness::new(&[]);
        h.bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", query("?")))
            .unwrap();
        assert_eq!(h.bus.pending_responses(), 1);

        h.bus.shutdown().unwrap();
        assert!(h.bus.is_shut_down());
        assert_eq!(h.bus.pending_responses(), 0);

        let after = h
            .bus
            .send_message(MessageDraft::new("a", to("b"), "ctx", query("?")));
        assert!(matches!(after, Err(CoordError::ShutDown)));
        assert!(h.bus.tick().unwrap().is_empty());

        h.drain();
        assert!(matches!(
            h.events.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        // Shutting down twice is fine.
        h.bus.shutdown().unwrap();
    }
}
