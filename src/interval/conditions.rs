//! # Gating conditions for interval attempts.
//!
//! A condition is a named async predicate; an attempt runs only when every
//! condition reports `true`. Dependency microservices declared on a service
//! become synthesized conditions that query the context's
//! [`HealthCheck`](crate::HealthCheck).
//!
//! ## Rules
//! - All conditions of one attempt are evaluated **concurrently**.
//! - Each evaluation is raced against [`CONDITION_TIMEOUT`]; a predicate that
//!   has not answered by then counts as unmet.
//! - A dependency condition with **no configured health check** is unmet
//!   (never fail-open), with an error log naming the dependency.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::time::timeout;
use tracing::error;

use crate::context::SchedulerContext;

/// Ceiling on any single condition evaluation.
pub const CONDITION_TIMEOUT: Duration = Duration::from_secs(15);

/// Named async predicate gating an interval attempt.
///
/// The closure creates a fresh future per evaluation.
pub type ConditionFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

enum ConditionKind {
    /// User-supplied predicate.
    User(ConditionFn),
    /// Synthesized probe of a dependency microservice.
    Microservice(String),
}

struct NamedCondition {
    name: String,
    kind: ConditionKind,
}

/// One unmet condition from an evaluation pass.
pub(crate) struct Unmet {
    pub name: String,
    pub is_dependency: bool,
}

/// The full condition set of one interval service.
pub(crate) struct ConditionSet {
    conditions: Vec<NamedCondition>,
}

impl ConditionSet {
    pub(crate) fn new(user: Vec<(String, ConditionFn)>, microservices: Vec<String>) -> Self {
        let mut conditions: Vec<NamedCondition> = user
            .into_iter()
            .map(|(name, f)| NamedCondition {
                name,
                kind: ConditionKind::User(f),
            })
            .collect();
        conditions.extend(microservices.into_iter().map(|name| NamedCondition {
            name: name.clone(),
            kind: ConditionKind::Microservice(name),
        }));
        Self { conditions }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates every condition concurrently and returns the unmet ones.
    pub(crate) async fn evaluate(&self, ctx: &SchedulerContext) -> Vec<Unmet> {
        if self.conditions.is_empty() {
            return Vec::new();
        }
        let health = ctx.health_check();
        let probes = self.conditions.iter().map(|cond| {
            let health = health.clone();
            async move {
                let met = match &cond.kind {
                    ConditionKind::User(f) => {
                        timeout(CONDITION_TIMEOUT, f()).await.unwrap_or(false)
                    }
                    ConditionKind::Microservice(service) => match health {
                        Some(check) => timeout(CONDITION_TIMEOUT, check.is_responsive(service))
                            .await
                            .unwrap_or(false),
                        None => {
                            error!(
                                microservice = %service,
                                "no health check configured, treating dependency as down"
                            );
                            false
                        }
                    },
                };
                (met, cond)
            }
        });
        join_all(probes)
            .await
            .into_iter()
            .filter(|(met, _)| !met)
            .map(|(_, cond)| Unmet {
                name: cond.name.clone(),
                is_dependency: matches!(cond.kind, ConditionKind::Microservice(_)),
            })
            .collect()
    }
}
