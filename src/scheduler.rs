//! Cooperative tick scheduler.
//!
//! Every sensor, circuit and the bus link registers one periodic task.  A
//! pass runs the tasks that are due, never overlapping, in phase order:
//!
//! ```text
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ RefreshSensor│──▶│ TickCircuit  │──▶│  PollLink    │
//!   └──────────────┘   └──────────────┘   └──────────────┘
//!          │                  │                  │
//!          ▼                  ▼                  ▼
//!   ┌──────────────────────────────────────────────────────┐
//!   │                    TaskDelegate                      │
//!   │              (Controller::on_task_due)               │
//!   └──────────────────────────────────────────────────────┘
//! ```
//!
//! Within a phase tasks run in registration order, so children registered
//! before their aggregate are sampled first.  The scheduler itself knows
//! nothing about what a task does.

use heapless::Vec;
use log::{info, warn};

use crate::app::ports::TaskDelegate;

/// Maximum number of tasks (stack-allocated).
pub const MAX_TASKS: usize = 24;

/// What a task drives.  Indices refer to the registry's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    RefreshSensor(usize),
    TickCircuit(usize),
    PollLink,
}

impl TaskKind {
    fn phase(self) -> u8 {
        match self {
            Self::RefreshSensor(_) => 0,
            Self::TickCircuit(_) => 1,
            Self::PollLink => 2,
        }
    }
}

const PHASES: u8 = 3;

#[derive(Debug, Clone)]
struct Task {
    kind: TaskKind,
    period_ms: u64,
    next_due_ms: u64,
}

pub struct Scheduler {
    tasks: Vec<Task, MAX_TASKS>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register a task, first due immediately.  Returns the slot index, or
    /// `None` if the table is full.
    pub fn add(&mut self, label: &str, kind: TaskKind, period_ms: u64) -> Option<usize> {
        let task = Task {
            kind,
            period_ms: period_ms.max(1),
            next_due_ms: 0,
        };
        if self.tasks.push(task).is_err() {
            warn!("Scheduler: table full, '{}' not added", label);
            return None;
        }
        let slot = self.tasks.len() - 1;
        info!("Scheduler: added '{}' every {} ms at slot {}", label, period_ms, slot);
        Some(slot)
    }

    /// Run every task due at `now_ms`.  Returns how many ran.
    pub fn run_due(&mut self, now_ms: u64, delegate: &mut dyn TaskDelegate) -> usize {
        let mut ran = 0;
        for phase in 0..PHASES {
            for task in self.tasks.iter_mut() {
                if task.kind.phase() != phase || task.next_due_ms > now_ms {
                    continue;
                }
                delegate.on_task_due(&task.kind, now_ms);
                ran += 1;
                // Missed periods are dropped, not replayed.
                task.next_due_ms = task.next_due_ms.saturating_add(task.period_ms);
                if task.next_due_ms <= now_ms {
                    task.next_due_ms = now_ms + task.period_ms;
                }
            }
        }
        ran
    }

    /// Milliseconds until the next task is due (0 if one is overdue).
    pub fn next_due_in(&self, now_ms: u64) -> Option<u64> {
        self.tasks
            .iter()
            .map(|t| t.next_due_ms.saturating_sub(now_ms))
            .min()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
