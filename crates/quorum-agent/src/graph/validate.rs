use std::collections::{HashMap, HashSet, VecDeque};

use quorum_core::error::GraphError;

use super::binding::{InputBinding, INPUT_REF};
use super::step::{StepKind, StepSpec, WorkflowDefinition};

/// A validated workflow: structure checked, dependencies derived, order computed.
///
/// Steps are addressed by their index in declaration order.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    workflow_id: String,
    steps: Vec<StepSpec>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    bindings: Vec<Option<InputBinding>>,
    order: Vec<usize>,
    waves: Vec<Vec<usize>>,
}

impl WorkflowGraph {
    /// Validate a definition. Any structural problem is reported before a
    /// single step could run.
    pub fn build(definition: &WorkflowDefinition) -> Result<Self, GraphError> {
        let steps = definition.steps.clone();
        if steps.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if step.id == INPUT_REF {
                return Err(GraphError::ReservedStepId(step.id.clone()));
            }
            if index.insert(step.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateStep(step.id.clone()));
            }
        }

        let n = steps.len();
        let mut dependencies = vec![Vec::new(); n];
        let mut dependents = vec![Vec::new(); n];
        for (i, step) in steps.iter().enumerate() {
            for target in &step.routes_to {
                let Some(&j) = index.get(target) else {
                    return Err(GraphError::DanglingRoute {
                        from: step.id.clone(),
                        to: target.clone(),
                    });
                };
                if j == i {
                    return Err(GraphError::Cycle {
                        step: step.id.clone(),
                    });
                }
                if !dependents[i].contains(&j) {
                    dependents[i].push(j);
                    dependencies[j].push(i);
                }
            }
        }

        let order = topological_order(&dependencies, &dependents).map_err(|on_cycle| {
            GraphError::Cycle {
                step: steps[on_cycle].id.clone(),
            }
        })?;

        check_kinds(&steps, &dependents)?;

        let ancestors = ancestor_sets(&order, &dependencies);
        let mut bindings = Vec::with_capacity(n);
        for (i, step) in steps.iter().enumerate() {
            let Some(template) = &step.inputs else {
                bindings.push(None);
                continue;
            };
            let binding = InputBinding::parse(template).map_err(|reason| {
                GraphError::InvalidBinding {
                    step: step.id.clone(),
                    reason,
                }
            })?;
            for reference in binding.references() {
                if reference == INPUT_REF {
                    continue;
                }
                let is_ancestor = index
                    .get(reference)
                    .is_some_and(|j| ancestors[i].contains(j));
                if !is_ancestor {
                    return Err(GraphError::UnboundReference {
                        step: step.id.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
            bindings.push(Some(binding));
        }

        let waves = waves(&order, &dependencies);

        Ok(Self {
            workflow_id: definition.id.clone(),
            steps,
            index,
            dependencies,
            dependents,
            bindings,
            order,
            waves,
        })
    }

    /// Check agent and strategy names against what is available.
    pub fn check_references(
        &self,
        agent_exists: impl Fn(&str) -> bool,
        strategy_exists: impl Fn(&str) -> bool,
    ) -> Result<(), GraphError> {
        for step in &self.steps {
            match step.kind {
                StepKind::AgentCall => {
                    if let Some(agent) = &step.agent {
                        if !agent_exists(agent) {
                            return Err(GraphError::UnknownAgent {
                                step: step.id.clone(),
                                agent: agent.clone(),
                            });
                        }
                    }
                }
                StepKind::Merge => {
                    if let Some(strategy) = &step.strategy {
                        if !strategy_exists(strategy) {
                            return Err(GraphError::UnknownStrategy {
                                step: step.id.clone(),
                                strategy: strategy.clone(),
                            });
                        }
                    }
                }
                StepKind::Branch | StepKind::Terminal => {}
            }
        }
        Ok(())
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, i: usize) -> &StepSpec {
        &self.steps[i]
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Upstream steps of `i`, in declaration order.
    pub fn dependencies(&self, i: usize) -> &[usize] {
        &self.dependencies[i]
    }

    pub fn dependents(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }

    pub fn binding(&self, i: usize) -> Option<&InputBinding> {
        self.bindings[i].as_ref()
    }

    /// A topological order (ties broken by declaration order).
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Steps grouped by depth: every step's dependencies sit in earlier waves.
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.steps.len()).filter(|&i| self.dependencies[i].is_empty())
    }

    pub fn terminals(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.steps.len()).filter(|&i| self.steps[i].kind == StepKind::Terminal)
    }

    /// Branch steps that are all-or-nothing and route to `i`.
    pub fn all_or_nothing_group(&self, i: usize) -> Option<usize> {
        self.dependencies[i].iter().copied().find(|&d| {
            let step = &self.steps[d];
            step.kind == StepKind::Branch && step.all_or_nothing
        })
    }
}

/// Kahn's algorithm. On a cycle, returns the index of a step that lies on it.
fn topological_order(
    dependencies: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<Vec<usize>, usize> {
    let n = dependencies.len();
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &j in &dependents[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push_back(j);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    // Every unplaced step has an unplaced predecessor, so walking predecessors
    // n times from any of them must end on a cycle.
    let placed: HashSet<usize> = order.into_iter().collect();
    let Some(mut current) = (0..n).find(|i| !placed.contains(i)) else {
        return Err(0);
    };
    for _ in 0..n {
        match dependencies[current].iter().find(|d| !placed.contains(d)) {
            Some(&prev) => current = prev,
            None => break,
        }
    }

    // Report the earliest-declared step on that cycle.
    let start = current;
    let mut lowest = current;
    for _ in 0..n {
        match dependencies[current].iter().find(|d| !placed.contains(d)) {
            Some(&prev) => current = prev,
            None => break,
        }
        lowest = lowest.min(current);
        if current == start {
            break;
        }
    }
    Err(lowest)
}

fn check_kinds(steps: &[StepSpec], dependents: &[Vec<usize>]) -> Result<(), GraphError> {
    let mut has_terminal = false;
    for (i, step) in steps.iter().enumerate() {
        match step.kind {
            StepKind::Terminal => {
                has_terminal = true;
                if !step.routes_to.is_empty() {
                    return Err(GraphError::TerminalRoutes(step.id.clone()));
                }
            }
            StepKind::Branch => {
                for &child in &dependents[i] {
                    if steps[child].kind != StepKind::AgentCall {
                        return Err(GraphError::InvalidBranchChild {
                            branch: step.id.clone(),
                            child: steps[child].id.clone(),
                        });
                    }
                }
            }
            StepKind::AgentCall => {
                if step.agent.as_deref().map_or(true, str::is_empty) {
                    return Err(GraphError::MissingReference {
                        step: step.id.clone(),
                        field: "agent",
                    });
                }
            }
            StepKind::Merge => {
                if step.strategy.as_deref().map_or(true, str::is_empty) {
                    return Err(GraphError::MissingReference {
                        step: step.id.clone(),
                        field: "strategy",
                    });
                }
            }
        }
    }
    if !has_terminal {
        return Err(GraphError::NoTerminal);
    }
    Ok(())
}

fn ancestor_sets(order: &[usize], dependencies: &[Vec<usize>]) -> Vec<HashSet<usize>> {
    let mut ancestors = vec![HashSet::new(); dependencies.len()];
    for &i in order {
        let mut set = HashSet::new();
        for &d in &dependencies[i] {
            set.insert(d);
            set.extend(ancestors[d].iter().copied());
        }
        ancestors[i] = set;
    }
    ancestors
}

fn waves(order: &[usize], dependencies: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut level = vec![0usize; dependencies.len()];
    let mut waves: Vec<Vec<usize>> = Vec::new();
    for &i in order {
        level[i] = dependencies[i]
            .iter()
            .map(|&d| level[d] + 1)
            .max()
            .unwrap_or(0);
        if waves.len() <= level[i] {
            waves.resize_with(level[i] + 1, Vec::new);
        }
        waves[level[i]].push(i);
    }
    for wave in &mut waves {
        wave.sort_unstable();
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(steps: Vec<StepSpec>) -> WorkflowDefinition {
        WorkflowDefinition::new("test", steps)
    }

    fn panel() -> WorkflowDefinition {
        wf(vec![
            StepSpec::branch("fan").routes_to(["a", "b", "c"]),
            StepSpec::agent_call("a", "alpha").routes_to(["vote"]),
            StepSpec::agent_call("b", "beta").routes_to(["vote"]),
            StepSpec::agent_call("c", "gamma").routes_to(["vote"]),
            StepSpec::merge("vote", "voting").routes_to(["done"]),
            StepSpec::terminal("done"),
        ])
    }

    #[test]
    fn panel_builds_with_waves() {
        let graph = WorkflowGraph::build(&panel()).unwrap();
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec![0]);
        assert_eq!(graph.dependencies(4), &[1, 2, 3]);
        assert_eq!(
            graph.waves(),
            &[vec![0], vec![1, 2, 3], vec![4], vec![5]]
        );
        assert_eq!(graph.terminals().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert_eq!(WorkflowGraph::build(&wf(vec![])).unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn duplicate_and_reserved_ids() {
        let dup = wf(vec![StepSpec::terminal("x"), StepSpec::terminal("x")]);
        assert_eq!(
            WorkflowGraph::build(&dup).unwrap_err(),
            GraphError::DuplicateStep("x".into())
        );
        let reserved = wf(vec![StepSpec::terminal("input")]);
        assert_eq!(
            WorkflowGraph::build(&reserved).unwrap_err(),
            GraphError::ReservedStepId("input".into())
        );
    }

    #[test]
    fn dangling_route_is_rejected() {
        let def = wf(vec![
            StepSpec::agent_call("a", "alpha").routes_to(["nowhere"]),
            StepSpec::terminal("done"),
        ]);
        assert_eq!(
            WorkflowGraph::build(&def).unwrap_err(),
            GraphError::DanglingRoute {
                from: "a".into(),
                to: "nowhere".into()
            }
        );
    }

    #[test]
    fn cycle_names_a_step_on_it() {
        let def = wf(vec![
            StepSpec::agent_call("start", "alpha").routes_to(["a"]),
            StepSpec::agent_call("a", "alpha").routes_to(["b"]),
            StepSpec::agent_call("b", "alpha").routes_to(["c", "done"]),
            StepSpec::agent_call("c", "alpha").routes_to(["a"]),
            StepSpec::terminal("done"),
        ]);
        assert_eq!(
            WorkflowGraph::build(&def).unwrap_err(),
            GraphError::Cycle { step: "a".into() }
        );
    }

    #[test]
    fn self_route_is_a_cycle() {
        let def = wf(vec![
            StepSpec::agent_call("a", "alpha").routes_to(["a"]),
            StepSpec::terminal("done"),
        ]);
        assert_eq!(
            WorkflowGraph::build(&def).unwrap_err(),
            GraphError::Cycle { step: "a".into() }
        );
    }

    #[test]
    fn kind_rules() {
        let no_terminal = wf(vec![StepSpec::agent_call("a", "alpha")]);
        assert_eq!(WorkflowGraph::build(&no_terminal).unwrap_err(), GraphError::NoTerminal);

        let routed_terminal = wf(vec![
            StepSpec::terminal("t").routes_to(["u"]),
            StepSpec::terminal("u"),
        ]);
        assert_eq!(
            WorkflowGraph::build(&routed_terminal).unwrap_err(),
            GraphError::TerminalRoutes("t".into())
        );

        let bad_branch = wf(vec![
            StepSpec::branch("fan").routes_to(["m"]),
            StepSpec::merge("m", "voting").routes_to(["t"]),
            StepSpec::terminal("t"),
        ]);
        assert_eq!(
            WorkflowGraph::build(&bad_branch).unwrap_err(),
            GraphError::InvalidBranchChild {
                branch: "fan".into(),
                child: "m".into()
            }
        );

        let mut anonymous = StepSpec::agent_call("a", "alpha").routes_to(["t"]);
        anonymous.agent = None;
        assert_eq!(
            WorkflowGraph::build(&wf(vec![anonymous, StepSpec::terminal("t")])).unwrap_err(),
            GraphError::MissingReference {
                step: "a".into(),
                field: "agent"
            }
        );
    }

    #[test]
    fn bindings_may_only_reference_ancestors() {
        let ok = wf(vec![
            StepSpec::agent_call("draft", "writer").routes_to(["review"]),
            StepSpec::agent_call("review", "critic")
                .with_inputs("Original: {{input}}\nDraft: {{draft}}")
                .routes_to(["done"]),
            StepSpec::terminal("done").with_inputs("{{draft}}\n---\n{{review}}"),
        ]);
        assert!(WorkflowGraph::build(&ok).is_ok());

        let sibling = wf(vec![
            StepSpec::agent_call("a", "x").routes_to(["done"]),
            StepSpec::agent_call("b", "y").with_inputs("{{a}}").routes_to(["done"]),
            StepSpec::terminal("done"),
        ]);
        assert_eq!(
            WorkflowGraph::build(&sibling).unwrap_err(),
            GraphError::UnboundReference {
                step: "b".into(),
                reference: "a".into()
            }
        );

        let malformed = wf(vec![StepSpec::terminal("done").with_inputs("{{input")]);
        assert!(matches!(
            WorkflowGraph::build(&malformed).unwrap_err(),
            GraphError::InvalidBinding { .. }
        ));
    }

    #[test]
    fn references_are_checked_against_registry() {
        let graph = WorkflowGraph::build(&panel()).unwrap();
        assert!(graph
            .check_references(|_| true, |s| s == "voting")
            .is_ok());
        assert_eq!(
            graph
                .check_references(|a| a != "beta", |_| true)
                .unwrap_err(),
            GraphError::UnknownAgent {
                step: "b".into(),
                agent: "beta".into()
            }
        );
        assert_eq!(
            graph.check_references(|_| true, |_| false).unwrap_err(),
            GraphError::UnknownStrategy {
                step: "vote".into(),
                strategy: "voting".into()
            }
        );
    }
}
