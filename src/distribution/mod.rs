//! Distributed execution
//!
//! Partitions units across local and remote executor slots. Only slots
//! whose tags satisfy every executor requirement are eligible.

pub mod remote;

use anyhow::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{current_os_requirement, TestRunConfiguration};
use crate::executor::{Assignment, UnitExecutor};
use crate::models::TestUnit;

pub use remote::RemoteExecutor;

/// Where a slot executes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorKind {
    Local,
    Remote,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Local => write!(f, "local"),
            ExecutorKind::Remote => write!(f, "remote"),
        }
    }
}

/// An executor slot units can be assigned to
#[derive(Clone)]
pub struct ExecutorSlot {
    pub id: String,
    pub kind: ExecutorKind,
    pub tags: BTreeSet<String>,
    pub executor: Arc<dyn UnitExecutor>,
}

impl ExecutorSlot {
    pub fn new(id: impl Into<String>, kind: ExecutorKind, executor: Arc<dyn UnitExecutor>) -> Self {
        Self {
            id: id.into(),
            kind,
            tags: BTreeSet::new(),
            executor,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn satisfies(&self, requirements: &BTreeSet<String>) -> bool {
        requirements.is_subset(&self.tags)
    }
}

impl fmt::Debug for ExecutorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSlot")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Plans which executor runs each unit
pub struct DistributionCoordinator {
    slots: Vec<ExecutorSlot>,
    requirements: BTreeSet<String>,
    local: Arc<dyn UnitExecutor>,
}

impl DistributionCoordinator {
    /// Every unit runs on the given local executor
    pub fn local_only(local: Arc<dyn UnitExecutor>) -> Self {
        Self {
            slots: vec![ExecutorSlot::new("local", ExecutorKind::Local, local.clone())],
            requirements: BTreeSet::new(),
            local,
        }
    }

    /// Build the slot set from the resolved configuration
    pub fn from_config(config: &TestRunConfiguration, local: Arc<dyn UnitExecutor>) -> Result<Self> {
        let settings = &config.distribution;
        if !settings.enabled {
            return Ok(Self::local_only(local));
        }

        let mut coordinator = Self {
            slots: Vec::new(),
            requirements: config.executor_requirements.clone(),
            local: local.clone(),
        };

        for i in 0..settings.max_local_executors {
            coordinator.slots.push(
                ExecutorSlot::new(format!("local-{}", i + 1), ExecutorKind::Local, local.clone())
                    .with_tags(current_os_requirement()),
            );
        }

        let mut remote_count = 0;
        for agent in &settings.executors {
            let slot_tags: BTreeSet<String> = agent.tags.iter().cloned().collect();
            if !coordinator.requirements.is_subset(&slot_tags) {
                info!("Remote executor {} does not meet requirements, skipped", agent.id);
                continue;
            }
            if remote_count >= settings.max_remote_executors {
                break;
            }

            let executor = RemoteExecutor::new(
                agent,
                settings.access_key.clone(),
                settings.remote_timeout,
                local.clone(),
            )?;
            coordinator.slots.push(
                ExecutorSlot::new(agent.id.clone(), ExecutorKind::Remote, Arc::new(executor))
                    .with_tags(slot_tags),
            );
            remote_count += 1;
        }

        info!(
            "Distribution enabled: {} local, {} remote slots",
            settings.max_local_executors, remote_count
        );
        Ok(coordinator)
    }

    /// Eligible slots; empty when nothing satisfies the requirements
    pub fn eligible_slots(&self) -> Vec<&ExecutorSlot> {
        self.slots
            .iter()
            .filter(|slot| slot.satisfies(&self.requirements))
            .collect()
    }

    /// Assign units round-robin, in unit order, over the eligible slots.
    /// Falls back to the local executor when no slot is eligible.
    pub fn plan(&self, units: &[TestUnit]) -> Vec<Assignment> {
        let eligible = self.eligible_slots();
        if eligible.is_empty() {
            warn!(
                "No executor satisfies requirements {:?}, executing locally",
                self.requirements
            );
            return units
                .iter()
                .map(|unit| Assignment::new(unit.clone(), self.local.clone()))
                .collect();
        }

        units
            .iter()
            .enumerate()
            .map(|(i, unit)| {
                let slot = eligible[i % eligible.len()];
                Assignment::new(unit.clone(), slot.executor.clone())
            })
            .collect()
    }
}

#[cfg(test)]
impl DistributionCoordinator {
    fn with_slot(mut self, slot: ExecutorSlot) -> Self {
        self.slots.push(slot);
        self
    }

    fn with_requirements(mut self, requirements: BTreeSet<String>) -> Self {
        self.requirements = requirements;
        self
    }

    fn slot_ids(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, BuildParameters, RemoteExecutorConfig};
    use crate::executor::testing::ScriptedExecutor;

    fn scripted() -> Arc<dyn UnitExecutor> {
        Arc::new(ScriptedExecutor::new())
    }

    fn units(n: usize) -> Vec<TestUnit> {
        (0..n)
            .map(|i| TestUnit::new(format!("U{i}Test"), vec!["true".into()]))
            .collect()
    }

    fn requirement(tag: &str) -> BTreeSet<String> {
        [tag.to_string()].into_iter().collect()
    }

    #[test]
    fn test_local_only_plan() {
        let coordinator = DistributionCoordinator::local_only(scripted());
        assert_eq!(coordinator.slot_ids(), vec!["local"]);
        let plan = coordinator.plan(&units(3));
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|a| a.executor.name() == "scripted"));
    }

    #[test]
    fn test_round_robin_over_eligible_slots() {
        let remote_a = scripted();
        let coordinator = DistributionCoordinator::local_only(scripted())
            .with_slot(ExecutorSlot::new("a", ExecutorKind::Remote, remote_a.clone()).with_tags(["os=linux"]))
            .with_slot(ExecutorSlot::new("b", ExecutorKind::Remote, scripted()).with_tags(["os=windows"]))
            .with_requirements(requirement("os=linux"));

        let eligible: Vec<_> = coordinator.eligible_slots().iter().map(|s| s.id.clone()).collect();
        assert_eq!(eligible, vec!["a"]);

        let plan = coordinator.plan(&units(4));
        assert!(plan.iter().all(|a| Arc::ptr_eq(&a.executor, &remote_a)));
    }

    #[test]
    fn test_no_eligible_slot_falls_back_to_local() {
        let local = scripted();
        let coordinator = DistributionCoordinator::local_only(local.clone())
            .with_requirements(requirement("gpu=true"));
        let plan = coordinator.plan(&units(2));
        assert!(plan.iter().all(|a| Arc::ptr_eq(&a.executor, &local)));
    }

    #[test]
    fn test_from_config_caps_and_filters() {
        let mut params = BuildParameters::default();
        params.distribution.enabled = true;
        params.distribution.max_local_executors = Some(2);
        params.distribution.max_remote_executors = Some(1);
        params.distribution.requirements = vec!["pool=fast".to_string()];
        params.distribution.executors = vec![
            RemoteExecutorConfig {
                id: "slow".to_string(),
                endpoint: "http://127.0.0.1:9".to_string(),
                tags: vec!["pool=slow".to_string()],
            },
            RemoteExecutorConfig {
                id: "fast-1".to_string(),
                endpoint: "http://127.0.0.1:9".to_string(),
                tags: vec!["pool=fast".to_string()],
            },
            RemoteExecutorConfig {
                id: "fast-2".to_string(),
                endpoint: "http://127.0.0.1:9".to_string(),
                tags: vec!["pool=fast".to_string()],
            },
        ];
        let config = resolve(&params, None);

        let coordinator = DistributionCoordinator::from_config(&config, scripted()).unwrap();
        assert_eq!(coordinator.slot_ids(), vec!["local-1", "local-2", "fast-1"]);

        // Local slots lack the pool tag, so only the remote slot is eligible
        let eligible: Vec<_> = coordinator.eligible_slots().iter().map(|s| s.kind).collect();
        assert_eq!(eligible, vec![ExecutorKind::Remote]);
    }

    #[test]
    fn test_disabled_distribution_is_local_only() {
        let config = resolve(&BuildParameters::default(), None);
        let coordinator = DistributionCoordinator::from_config(&config, scripted()).unwrap();
        assert_eq!(coordinator.slot_ids(), vec!["local"]);
    }

    #[test]
    fn test_remote_only_configuration_has_no_local_slot() {
        let mut params = BuildParameters::default();
        params.distribution.enabled = true;
        params.distribution.max_local_executors = Some(0);
        params.distribution.executors = vec![RemoteExecutorConfig {
            id: "agent".to_string(),
            endpoint: "http://127.0.0.1:9".to_string(),
            tags: Vec::new(),
        }];
        let config = resolve(&params, None);

        let local = scripted();
        let coordinator = DistributionCoordinator::from_config(&config, local.clone()).unwrap();
        assert_eq!(coordinator.slot_ids(), vec!["agent"]);

        let plan = coordinator.plan(&units(3));
        assert!(plan.iter().all(|a| !Arc::ptr_eq(&a.executor, &local)));
    }
}
