use super::context::{FlowControlContext, ProgressSnapshot};
use super::policy::FlowControlPolicy;
use crate::domain::Record;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Forwarding,
    Pausing,
}

/// What the producer hands the gate.
#[derive(Debug)]
pub enum FlowInput {
    Record(Record),
    /// Re-evaluate guards without a record.
    Tick,
    /// The session is finalizing; everything held must drain.
    Flush,
}

/// Side effects the caller executes, in order, after an input.
#[derive(Debug, PartialEq)]
pub enum Effect {
    Forward(Record),
    Pause,
}

/// Guard evaluation environment that is not owned by any state.
struct Env<'a> {
    policy: &'a FlowControlPolicy,
    now: Instant,
}

struct Transition<S> {
    name: &'static str,
    guard: fn(&S, &FlowInput, &Env<'_>) -> bool,
    target: GateState,
    action: fn(&mut S, &mut Vec<Effect>),
}

trait GateBehavior: Sized + 'static {
    const TRANSITIONS: &'static [Transition<Self>];

    fn on_enter(context: FlowControlContext, now: Instant) -> Self;
    fn on_exit(&mut self) -> FlowControlContext;
    fn on_check(&mut self, input: FlowInput, env: &Env<'_>, effects: &mut Vec<Effect>);
    fn context_mut(&mut self) -> &mut FlowControlContext;
}

#[derive(Debug)]
struct Forwarding {
    context: FlowControlContext,
}

#[derive(Debug)]
struct Pausing {
    context: FlowControlContext,
    held: VecDeque<Record>,
    last_written: u64,
    last_progress_at: Instant,
}

impl GateBehavior for Forwarding {
    const TRANSITIONS: &'static [Transition<Self>] = &[Transition {
        name: "pause",
        guard: should_pause,
        target: GateState::Pausing,
        action: do_pause,
    }];

    fn on_enter(context: FlowControlContext, _now: Instant) -> Self {
        Self { context }
    }

    fn on_exit(&mut self) -> FlowControlContext {
        self.context
    }

    fn on_check(&mut self, input: FlowInput, _env: &Env<'_>, effects: &mut Vec<Effect>) {
        match input {
            FlowInput::Record(record) => {
                self.context.forwarded += record.size_bytes();
                effects.push(Effect::Forward(record));
            }
            FlowInput::Tick => {}
            FlowInput::Flush => self.context.finalizing = true,
        }
    }

    fn context_mut(&mut self) -> &mut FlowControlContext {
        &mut self.context
    }
}

impl GateBehavior for Pausing {
    const TRANSITIONS: &'static [Transition<Self>] = &[
        Transition {
            name: "unpause",
            guard: should_unpause,
            target: GateState::Forwarding,
            action: release_held,
        },
        Transition {
            name: "recover",
            guard: should_recover,
            target: GateState::Forwarding,
            action: do_recover,
        },
        Transition {
            name: "quiesce",
            guard: should_quiesce,
            target: GateState::Forwarding,
            action: release_held,
        },
    ];

    fn on_enter(context: FlowControlContext, now: Instant) -> Self {
        Self {
            context,
            held: VecDeque::new(),
            last_written: context.written,
            last_progress_at: now,
        }
    }

    fn on_exit(&mut self) -> FlowControlContext {
        self.context
    }

    fn on_check(&mut self, input: FlowInput, env: &Env<'_>, _effects: &mut Vec<Effect>) {
        if self.context.written > self.last_written {
            self.last_written = self.context.written;
            self.last_progress_at = env.now;
        }
        match input {
            FlowInput::Record(record) => self.held.push_back(record),
            FlowInput::Tick => {}
            FlowInput::Flush => self.context.finalizing = true,
        }
    }

    fn context_mut(&mut self) -> &mut FlowControlContext {
        &mut self.context
    }
}

fn should_pause(state: &Forwarding, _input: &FlowInput, env: &Env<'_>) -> bool {
    !state.context.finalizing && state.context.backlog() >= env.policy.high_water_bytes
}

fn should_unpause(state: &Pausing, _input: &FlowInput, env: &Env<'_>) -> bool {
    state.context.backlog() < env.policy.low_water_bytes
}

fn should_recover(state: &Pausing, _input: &FlowInput, env: &Env<'_>) -> bool {
    let stalled = state.context.written == state.last_written
        && env.now.saturating_duration_since(state.last_progress_at) >= env.policy.stall_timeout;
    stalled || state.held.len() >= env.policy.max_held_records
}

fn should_quiesce(state: &Pausing, input: &FlowInput, _env: &Env<'_>) -> bool {
    matches!(input, FlowInput::Flush) || state.context.finalizing
}

fn do_pause(state: &mut Forwarding, effects: &mut Vec<Effect>) {
    info!(
        backlog = state.context.backlog(),
        forwarded = state.context.forwarded,
        written = state.context.written,
        "flow control: pausing producer"
    );
    effects.push(Effect::Pause);
}

fn do_recover(state: &mut Pausing, effects: &mut Vec<Effect>) {
    warn!(
        backlog = state.context.backlog(),
        held = state.held.len(),
        "flow control: no progress from server, resuming anyway"
    );
    release_held(state, effects);
}

fn release_held(state: &mut Pausing, effects: &mut Vec<Effect>) {
    for record in state.held.drain(..) {
        state.context.forwarded += record.size_bytes();
        effects.push(Effect::Forward(record));
    }
}

/// Evaluates `S`'s transitions in table order and fires the first whose
/// guard holds.
fn fire<S: GateBehavior>(
    state: &mut S,
    input: &FlowInput,
    env: &Env<'_>,
    effects: &mut Vec<Effect>,
) -> Option<GateState> {
    let transition = S::TRANSITIONS
        .iter()
        .find(|transition| (transition.guard)(state, input, env))?;
    debug!(transition = transition.name, "flow control transition");
    (transition.action)(state, effects);
    Some(transition.target)
}

#[derive(Debug)]
enum StateData {
    Forwarding(Forwarding),
    Pausing(Pausing),
}

impl StateData {
    fn enter(target: GateState, context: FlowControlContext, now: Instant) -> Self {
        match target {
            GateState::Forwarding => StateData::Forwarding(Forwarding::on_enter(context, now)),
            GateState::Pausing => StateData::Pausing(Pausing::on_enter(context, now)),
        }
    }

    fn exit(&mut self) -> FlowControlContext {
        match self {
            StateData::Forwarding(state) => state.on_exit(),
            StateData::Pausing(state) => state.on_exit(),
        }
    }

    fn context(&self) -> FlowControlContext {
        match self {
            StateData::Forwarding(state) => state.context,
            StateData::Pausing(state) => state.context,
        }
    }
}

/// Two-state reactive machine deciding whether a record is forwarded now or
/// held while the producer is asked to slow down.
///
/// The gate is pure: it never performs I/O. Each call to [`Gate::input`]
/// refreshes the context from the observed progress, evaluates the current
/// state's guards in fixed order, fires at most one transition, and then
/// lets the (possibly new) state handle the input.
#[derive(Debug)]
pub struct Gate {
    policy: FlowControlPolicy,
    state: StateData,
}

impl Gate {
    pub fn new(policy: FlowControlPolicy) -> Self {
        Self {
            policy,
            state: StateData::Forwarding(Forwarding {
                context: FlowControlContext::default(),
            }),
        }
    }

    pub fn input(
        &mut self,
        input: FlowInput,
        observed: ProgressSnapshot,
        now: Instant,
    ) -> Vec<Effect> {
        let env = Env {
            policy: &self.policy,
            now,
        };
        let mut effects = Vec::new();

        let target = match &mut self.state {
            StateData::Forwarding(state) => {
                refresh(state, &observed);
                fire(state, &input, &env, &mut effects)
            }
            StateData::Pausing(state) => {
                refresh(state, &observed);
                fire(state, &input, &env, &mut effects)
            }
        };

        if let Some(target) = target {
            let context = self.state.exit();
            self.state = StateData::enter(target, context, now);
        }

        match &mut self.state {
            StateData::Forwarding(state) => state.on_check(input, &env, &mut effects),
            StateData::Pausing(state) => state.on_check(input, &env, &mut effects),
        }
        effects
    }

    pub fn state(&self) -> GateState {
        match self.state {
            StateData::Forwarding(_) => GateState::Forwarding,
            StateData::Pausing(_) => GateState::Pausing,
        }
    }

    pub fn context(&self) -> FlowControlContext {
        self.state.context()
    }

    /// Records held back while pausing.
    pub fn held_len(&self) -> usize {
        match &self.state {
            StateData::Forwarding(_) => 0,
            StateData::Pausing(state) => state.held.len(),
        }
    }

    pub fn policy(&self) -> &FlowControlPolicy {
        &self.policy
    }
}

fn refresh<S: GateBehavior>(state: &mut S, observed: &ProgressSnapshot) {
    let context = state.context_mut();
    *context = context.observe(observed);
}
