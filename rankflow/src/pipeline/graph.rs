//! Stage ordering from declared data flow.

use super::StageSpec;
use crate::core::{Fingerprint, FINGERPRINT_FORMAT_VERSION};
use crate::errors::{ConfigurationError, ContractErrorInfo, CycleError, PlanError, UnresolvedInputError};
use serde_json::json;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use tracing::debug;

/// The stage dependency graph, built from stage specifications.
///
/// Edges run from the stage declaring an output to every stage with an input
/// bound to it.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    specs: Vec<StageSpec>,
}

impl DependencyGraph {
    /// Creates a graph over `specs` in declaration order.
    #[must_use]
    pub fn new(specs: Vec<StageSpec>) -> Self {
        Self { specs }
    }

    /// Resolves the graph into an execution plan.
    ///
    /// Stages are topologically sorted; among stages ready at the same time
    /// the one declared first runs first, so the plan is a pure function of
    /// the input.
    ///
    /// # Errors
    ///
    /// - [`PlanError::Configuration`] for an invalid spec, a duplicate stage
    ///   name, or an output declared by two stages
    /// - [`PlanError::UnresolvedInput`] for a binding nobody produces
    /// - [`PlanError::Cycle`] if the data flow is cyclic
    pub fn build(self) -> Result<ExecutionPlan, PlanError> {
        let producers = self.validate()?;
        let predecessors = self.predecessors(&producers)?;
        let order = self.topological_order(&predecessors)?;
        let levels = levels(&order, &predecessors);

        let mut position = vec![0; self.specs.len()];
        for (pos, &idx) in order.iter().enumerate() {
            position[idx] = pos;
        }

        let producers = producers
            .into_iter()
            .map(|(output, idx)| (output, self.specs[idx].name.clone()))
            .collect();
        let levels = levels
            .into_iter()
            .map(|level| level.into_iter().map(|idx| self.specs[idx].name.clone()).collect())
            .collect();

        let mut slots: Vec<Option<StageSpec>> = self.specs.into_iter().map(Some).collect();
        let stages: Vec<StageSpec> = order.iter().filter_map(|&idx| slots[idx].take()).collect();

        let plan = ExecutionPlan::new(stages, levels, producers);
        debug!(
            stages = plan.len(),
            levels = plan.levels().len(),
            fingerprint = plan.fingerprint().short(),
            "built execution plan"
        );
        Ok(plan)
    }

    /// Validates names and returns the output -> producing stage index map.
    fn validate(&self) -> Result<BTreeMap<String, usize>, ConfigurationError> {
        let mut names: HashMap<&str, usize> = HashMap::new();
        let mut producers: BTreeMap<String, usize> = BTreeMap::new();

        for (idx, spec) in self.specs.iter().enumerate() {
            spec.validate()?;

            if names.insert(spec.name.as_str(), idx).is_some() {
                return Err(ConfigurationError::new(format!("Duplicate stage name '{}'", spec.name))
                    .with_stages(vec![spec.name.clone()])
                    .with_hint("Stage names must be unique within a pipeline."));
            }

            for output in &spec.outputs {
                if let Some(&other) = producers.get(output) {
                    let first = self.specs[other].name.clone();
                    return Err(ConfigurationError::new(format!(
                        "Output '{output}' is declared by both '{first}' and '{}'",
                        spec.name
                    ))
                    .with_stages(vec![first, spec.name.clone()])
                    .with_error_info(
                        ContractErrorInfo::new("PLAN-003-CONFIG", format!("Output '{output}' has two producers"))
                            .with_fix_hint("Rename one of the outputs; every output needs exactly one producer.")
                            .with_context_entry("output", output.clone()),
                    ));
                }
                producers.insert(output.clone(), idx);
            }
        }

        Ok(producers)
    }

    /// Producer indices of every stage, deduplicated and sorted.
    fn predecessors(&self, producers: &BTreeMap<String, usize>) -> Result<Vec<Vec<usize>>, UnresolvedInputError> {
        let mut all = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let mut preds = BTreeSet::new();
            for (input, output) in &spec.inputs {
                let producer = producers
                    .get(output)
                    .ok_or_else(|| UnresolvedInputError::new(&spec.name, input, output))?;
                preds.insert(*producer);
            }
            all.push(preds.into_iter().collect());
        }
        Ok(all)
    }

    /// Kahn's algorithm with a min-heap on declaration index.
    fn topological_order(&self, predecessors: &[Vec<usize>]) -> Result<Vec<usize>, CycleError> {
        let n = self.specs.len();
        let mut successors = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for (consumer, preds) in predecessors.iter().enumerate() {
            in_degree[consumer] = preds.len();
            for &p in preds {
                successors[p].push(consumer);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &next in &successors[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }

        let blocked: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        Err(CycleError::new(self.cycle_path(predecessors, &blocked)))
    }

    /// Finds one cycle among the stages Kahn's algorithm could not order.
    ///
    /// Every blocked stage has a blocked producer, so walking producers from
    /// any blocked stage must revisit a stage.
    fn cycle_path(&self, predecessors: &[Vec<usize>], blocked: &[bool]) -> Vec<String> {
        let Some(start) = blocked.iter().position(|&b| b) else {
            return Vec::new();
        };

        let mut walk = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = predecessors[current].iter().find(|&&p| blocked[p]) else {
                break;
            };
            if let Some(pos) = walk.iter().position(|&idx| idx == next) {
                let mut cycle: Vec<usize> = walk[pos..].to_vec();
                cycle.push(next);
                cycle.reverse();
                return cycle.into_iter().map(|idx| self.specs[idx].name.clone()).collect();
            }
            walk.push(next);
            current = next;
        }

        walk.into_iter().map(|idx| self.specs[idx].name.clone()).collect()
    }
}

fn levels(order: &[usize], predecessors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut depth = vec![0usize; predecessors.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();

    for &idx in order {
        let d = predecessors[idx].iter().map(|&p| depth[p] + 1).max().unwrap_or(0);
        depth[idx] = d;
        if levels.len() <= d {
            levels.resize_with(d + 1, Vec::new);
        }
        levels[d].push(idx);
    }

    levels
}

/// A validated, ordered pipeline.
///
/// Every input binding resolves to an output of a stage earlier in the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    stages: Vec<StageSpec>,
    levels: Vec<Vec<String>>,
    producers: BTreeMap<String, String>,
    fingerprint: Fingerprint,
}

impl ExecutionPlan {
    fn new(stages: Vec<StageSpec>, levels: Vec<Vec<String>>, producers: BTreeMap<String, String>) -> Self {
        let fingerprint = Fingerprint::of_value(&json!({
            "version": FINGERPRINT_FORMAT_VERSION,
            "stages": stages,
        }));
        Self {
            stages,
            levels,
            producers,
            fingerprint,
        }
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true for a plan without stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Groups of mutually independent stages. Every stage's producers sit in
    /// earlier groups.
    #[must_use]
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// The stage declaring `output`.
    #[must_use]
    pub fn producer_of(&self, output: &str) -> Option<&str> {
        self.producers.get(output).map(String::as_str)
    }

    /// Position of `stage` in the plan.
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == stage)
    }

    /// Fingerprint over every stage spec in plan order.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;

    fn stage(name: &str, inputs: &[&str], outputs: &[&str]) -> StageSpec {
        inputs
            .iter()
            .fold(StageSpec::new(name, "t"), |s, i| s.consumes(*i))
            .with_outputs(outputs.iter().copied())
    }

    #[test]
    fn test_linear_chain_in_any_declaration_order() {
        let plan = DependencyGraph::new(vec![
            stage("c", &["b_out"], &["c_out"]),
            stage("a", &[], &["a_out"]),
            stage("b", &["a_out"], &["b_out"]),
        ])
        .build()
        .unwrap();

        assert_eq!(plan.order(), vec!["a", "b", "c"]);
        assert_eq!(plan.producer_of("b_out"), Some("b"));
        assert_eq!(plan.position("c"), Some(2));
    }

    #[test]
    fn test_ties_broken_by_declaration_index() {
        let plan = DependencyGraph::new(vec![
            stage("z", &[], &["z_out"]),
            stage("y", &[], &["y_out"]),
            stage("join", &["y_out", "z_out"], &["j"]),
            stage("x", &[], &["x_out"]),
        ])
        .build()
        .unwrap();

        assert_eq!(plan.order(), vec!["z", "y", "join", "x"]);
        assert_eq!(
            plan.levels(),
            &[vec!["z".to_string(), "y".to_string(), "x".to_string()], vec!["join".to_string()]]
        );
    }

    #[test]
    fn test_every_stage_after_its_producers() {
        let plan = DependencyGraph::new(vec![
            stage("d", &["b_out", "c_out"], &["d_out"]),
            stage("c", &["a_out"], &["c_out"]),
            stage("b", &["a_out"], &["b_out"]),
            stage("a", &[], &["a_out"]),
            stage("e", &["d_out", "a_out"], &["e_out"]),
        ])
        .build()
        .unwrap();

        for spec in plan.stages() {
            let pos = plan.position(&spec.name).unwrap();
            for output in spec.inputs.values() {
                let producer = plan.producer_of(output).unwrap();
                assert!(plan.position(producer).unwrap() < pos, "{producer} before {}", spec.name);
            }
        }
    }

    #[test]
    fn test_empty_plan() {
        let plan = DependencyGraph::new(Vec::new()).build().unwrap();
        assert!(plan.is_empty());
        assert!(plan.levels().is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let err = DependencyGraph::new(vec![
            stage("a", &["b_out"], &["a_out"]),
            stage("b", &["a_out"], &["b_out"]),
        ])
        .build()
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cycle);
        match err {
            PlanError::Cycle(e) => assert_eq!(e.cycle_path, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_found_behind_downstream_stage() {
        let err = DependencyGraph::new(vec![
            stage("sink", &["b_out"], &["s"]),
            stage("a", &["c_out"], &["a_out"]),
            stage("b", &["a_out"], &["b_out"]),
            stage("c", &["b_out"], &["c_out"]),
        ])
        .build()
        .unwrap_err();

        match err {
            PlanError::Cycle(e) => {
                assert_eq!(e.cycle_path.first(), e.cycle_path.last());
                assert!(!e.cycle_path.contains(&"sink".to_string()));
                assert_eq!(e.cycle_path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_binding_is_cycle() {
        let err = DependencyGraph::new(vec![stage("a", &["a_out"], &["a_out"])])
            .build()
            .unwrap_err();
        match err {
            PlanError::Cycle(e) => assert_eq!(e.cycle_path, vec!["a", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_input() {
        let err = DependencyGraph::new(vec![stage("a", &["missing"], &["a_out"])])
            .build()
            .unwrap_err();
        match err {
            PlanError::UnresolvedInput(e) => {
                assert_eq!(e.stage, "a");
                assert_eq!(e.output, "missing");
            }
            other => panic!("expected unresolved input, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_stage_and_output() {
        let dup_stage = DependencyGraph::new(vec![stage("a", &[], &["x"]), stage("a", &[], &["y"])]).build();
        assert_eq!(dup_stage.unwrap_err().kind(), ErrorKind::Configuration);

        let dup_output = DependencyGraph::new(vec![stage("a", &[], &["x"]), stage("b", &[], &["x"])]).build();
        match dup_output.unwrap_err() {
            PlanError::Configuration(e) => assert_eq!(e.stages, vec!["a", "b"]),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_fingerprint() {
        let build = |threshold: f64| {
            DependencyGraph::new(vec![
                stage("a", &[], &["a_out"]),
                stage("b", &["a_out"], &["b_out"]).with_parameter("threshold", threshold),
            ])
            .build()
            .unwrap()
        };

        assert_eq!(build(1.0).fingerprint(), build(1.0).fingerprint());
        assert_ne!(build(1.0).fingerprint(), build(2.0).fingerprint());
    }
}
