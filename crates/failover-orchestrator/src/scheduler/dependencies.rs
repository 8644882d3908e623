//! Wave prerequisite graph

use crate::models::execution::WaveStatus;
use crate::models::plan::WaveSpec;
use crate::models::violation::Violation;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// Prerequisite graph over wave numbers
#[derive(Debug, Clone, Default)]
pub struct WaveGraph {
    /// Wave number to the waves it depends on
    prerequisites: BTreeMap<u32, Vec<u32>>,
}

impl WaveGraph {
    pub fn from_specs(specs: &[WaveSpec]) -> Self {
        let prerequisites = specs
            .iter()
            .map(|spec| (spec.wave_number, spec.depends_on.clone()))
            .collect();
        Self { prerequisites }
    }

    /// Graph over an execution's wave snapshots
    pub fn from_waves(waves: &[WaveStatus]) -> Self {
        let prerequisites = waves
            .iter()
            .map(|wave| (wave.wave_number, wave.depends_on.clone()))
            .collect();
        Self { prerequisites }
    }

    pub fn contains(&self, wave_number: u32) -> bool {
        self.prerequisites.contains_key(&wave_number)
    }

    /// Ordering, unknown-prerequisite and cycle violations
    pub fn validate(specs: &[WaveSpec]) -> Vec<Violation> {
        let mut violations = Vec::new();

        for pair in specs.windows(2) {
            if pair[1].wave_number <= pair[0].wave_number {
                violations.push(Violation::WaveOrdering {
                    wave_number: pair[1].wave_number,
                    previous: pair[0].wave_number,
                });
            }
        }

        let graph = Self::from_specs(specs);
        for spec in specs {
            for dep in &spec.depends_on {
                if !graph.contains(*dep) {
                    violations.push(Violation::UnknownDependency {
                        wave_number: spec.wave_number,
                        depends_on: *dep,
                    });
                }
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            violations.push(Violation::DependencyCycle { waves: cycle });
        }
        violations
    }

    /// Waves forming a cycle, in discovery order
    pub fn find_cycle(&self) -> Option<Vec<u32>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();

        for &wave in self.prerequisites.keys() {
            if !visited.contains(&wave) {
                if let Some(cycle) = self.find_cycle_from(wave, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn find_cycle_from(
        &self,
        wave: u32,
        visited: &mut BTreeSet<u32>,
        stack: &mut Vec<u32>,
    ) -> Option<Vec<u32>> {
        visited.insert(wave);
        stack.push(wave);

        if let Some(deps) = self.prerequisites.get(&wave) {
            for &dep in deps {
                if let Some(pos) = stack.iter().position(|&w| w == dep) {
                    return Some(stack[pos..].to_vec());
                }
                if !visited.contains(&dep) && self.contains(dep) {
                    if let Some(cycle) = self.find_cycle_from(dep, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        None
    }

    /// Kahn's algorithm with the lowest ready wave number first
    ///
    /// Unknown prerequisites are ignored here; [`WaveGraph::validate`]
    /// reports them. Returns the cycle when no order exists.
    pub fn topological_order(&self) -> Result<Vec<u32>, Vec<u32>> {
        let mut remaining: BTreeMap<u32, usize> = self
            .prerequisites
            .iter()
            .map(|(&wave, deps)| {
                let known: BTreeSet<_> = deps.iter().filter(|d| self.contains(**d)).collect();
                (wave, known.len())
            })
            .collect();

        let mut dependents: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (&wave, deps) in &self.prerequisites {
            let known: BTreeSet<u32> = deps.iter().copied().filter(|d| self.contains(*d)).collect();
            for dep in known {
                dependents.entry(dep).or_default().push(wave);
            }
        }

        let mut ready: BinaryHeap<Reverse<u32>> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&wave, _)| Reverse(wave))
            .collect();
        let mut order = Vec::with_capacity(self.prerequisites.len());

        while let Some(Reverse(wave)) = ready.pop() {
            order.push(wave);
            for &next in dependents.get(&wave).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }

        if order.len() == self.prerequisites.len() {
            Ok(order)
        } else {
            Err(self.find_cycle().unwrap_or_default())
        }
    }

    /// Every wave that transitively depends on any of `failed`
    pub fn dependents_of(&self, failed: &BTreeSet<u32>) -> BTreeSet<u32> {
        let mut affected = BTreeSet::new();
        let mut changed = true;
        while changed {
            changed = false;
            for (&wave, deps) in &self.prerequisites {
                if affected.contains(&wave) || failed.contains(&wave) {
                    continue;
                }
                if deps
                    .iter()
                    .any(|d| failed.contains(d) || affected.contains(d))
                {
                    affected.insert(wave);
                    changed = true;
                }
            }
        }
        affected
    }
}
