//! Health tracking for the log and store collaborators.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// A collaborator whose health is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// Kafka polling and offset commits
    Log,
    /// Remote entity store
    Store,
}

impl Component {
    /// Name used in health responses.
    pub fn name(&self) -> &'static str {
        match self {
            Component::Log => "log",
            Component::Store => "store",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// No observation yet
    Unknown,
    /// Last interaction succeeded
    Healthy,
    /// Operational but recently failing
    Degraded(String),
    /// Not operational
    Unhealthy(String),
}

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Lowercase name used in health responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone)]
struct ComponentState {
    status: ComponentStatus,
    since: Instant,
}

/// Component health registry shared between the stream loop and HTTP handlers.
#[derive(Debug)]
pub struct HealthCheck {
    components: RwLock<BTreeMap<Component, ComponentState>>,
    last_commit: RwLock<Option<Instant>>,
    running: RwLock<bool>,
}

impl HealthCheck {
    /// Create a registry with every component in `Unknown` state.
    pub fn new() -> Self {
        let now = Instant::now();
        let components = [Component::Log, Component::Store]
            .into_iter()
            .map(|c| {
                (
                    c,
                    ComponentState {
                        status: ComponentStatus::Unknown,
                        since: now,
                    },
                )
            })
            .collect();

        Self {
            components: RwLock::new(components),
            last_commit: RwLock::new(None),
            running: RwLock::new(false),
        }
    }

    fn set(&self, component: Component, status: ComponentStatus) {
        let mut components = self.components.write();
        let unchanged = components
            .get(&component)
            .map(|state| state.status == status)
            .unwrap_or(false);
        if !unchanged {
            components.insert(
                component,
                ComponentState {
                    status,
                    since: Instant::now(),
                },
            );
        }
    }

    /// Mark a component as healthy.
    pub fn mark_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy);
    }

    /// Mark a component as degraded.
    pub fn mark_degraded(&self, component: Component, reason: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded(reason.into()));
    }

    /// Mark a component as unhealthy.
    pub fn mark_unhealthy(&self, component: Component, reason: impl Into<String>) {
        self.set(component, ComponentStatus::Unhealthy(reason.into()));
    }

    /// Status of one component.
    pub fn status(&self, component: Component) -> ComponentStatus {
        self.components
            .read()
            .get(&component)
            .map(|state| state.status.clone())
            .unwrap_or(ComponentStatus::Unknown)
    }

    /// How long a component has been in its current status.
    pub fn status_age(&self, component: Component) -> Option<Duration> {
        self.components
            .read()
            .get(&component)
            .map(|state| state.since.elapsed())
    }

    /// Every component with its status, in a stable order.
    pub fn statuses(&self) -> Vec<(Component, ComponentStatus)> {
        self.components
            .read()
            .iter()
            .map(|(c, state)| (*c, state.status.clone()))
            .collect()
    }

    /// Worst status across components. `Unknown` counts as healthy.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();
        let mut overall = HealthStatus::Healthy;
        for state in components.values() {
            match state.status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => overall = HealthStatus::Degraded,
                _ => {}
            }
        }
        overall
    }

    /// Whether the loop is running and no component is unhealthy.
    pub fn is_ready(&self) -> bool {
        self.is_running() && self.overall_status() != HealthStatus::Unhealthy
    }

    /// Record a successful offset commit.
    pub fn record_commit(&self) {
        *self.last_commit.write() = Some(Instant::now());
    }

    /// Time since the last successful commit.
    pub fn since_last_commit(&self) -> Option<Duration> {
        self.last_commit.read().map(|at| at.elapsed())
    }

    /// Mark the stream loop as running or stopped.
    pub fn set_running(&self, running: bool) {
        *self.running.write() = running;
    }

    /// Whether the stream loop is running.
    pub fn is_running(&self) -> bool {
        *self.running.read()
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
